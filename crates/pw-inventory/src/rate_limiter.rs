//! Per-method outbound rate limiting.
//!
//! Each configured API method gets its own `governor` limiter. Methods
//! without a quota are never throttled. The limiter is consulted by
//! [`crate::http::HttpClient`] before every request, so call sites stay
//! unaware of it.

use crate::config::ConfigError;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use metrics::counter;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// API method name of the asset listing call.
pub const LIST_ASSETS_METHOD: &str = "/google.cloud.asset.v1.AssetService/ListAssets";

/// API method name of the project lookup.
pub const GET_PROJECT_METHOD: &str = "/google.cloud.resourcemanager.v3.Projects/GetProject";

/// API method name of the organization lookup.
pub const GET_ORGANIZATION_METHOD: &str =
    "/google.cloud.resourcemanager.v3.Organizations/GetOrganization";

const LIST_ASSETS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(100) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Quota of one API method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodQuota {
    /// Requests allowed per period.
    pub requests: u32,
    /// Length of the period.
    pub period: Duration,
    /// Requests that may be issued back to back.
    pub burst: u32,
}

impl MethodQuota {
    fn to_quota(self, method: &str) -> Result<Quota, ConfigError> {
        if self.requests == 0 {
            return Err(ConfigError::InvalidQuota {
                method: method.to_string(),
                message: "requests must be > 0".to_string(),
            });
        }
        let burst = NonZeroU32::new(self.burst).ok_or_else(|| ConfigError::InvalidQuota {
            method: method.to_string(),
            message: "burst must be > 0".to_string(),
        })?;
        let quota = Quota::with_period(self.period / self.requests).ok_or_else(|| {
            ConfigError::InvalidQuota {
                method: method.to_string(),
                message: "period must be > 0".to_string(),
            }
        })?;
        Ok(quota.allow_burst(burst))
    }
}

/// Throttles outbound calls per API method.
#[derive(Clone, Default)]
pub struct MethodRateLimiter {
    limiters: HashMap<String, Arc<DirectRateLimiter>>,
}

impl MethodRateLimiter {
    /// Builds one limiter per entry of the quota table.
    pub fn new(quotas: &HashMap<String, MethodQuota>) -> Result<Self, ConfigError> {
        let mut limiters = HashMap::with_capacity(quotas.len());
        for (method, quota) in quotas {
            let quota = quota.to_quota(method)?;
            limiters.insert(method.clone(), Arc::new(RateLimiter::direct(quota)));
        }
        Ok(Self { limiters })
    }

    /// A limiter that never throttles.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// The asset API quota: 100 listing calls per minute, burst 1.
    pub fn assets_inventory_default() -> Self {
        let quota = Quota::per_minute(LIST_ASSETS_PER_MINUTE).allow_burst(NonZeroU32::MIN);
        let mut limiters = HashMap::new();
        limiters.insert(
            LIST_ASSETS_METHOD.to_string(),
            Arc::new(RateLimiter::direct(quota)),
        );
        Self { limiters }
    }

    /// Whether calls to `method` are throttled.
    pub fn is_throttled(&self, method: &str) -> bool {
        self.limiters.contains_key(method)
    }

    /// Waits until a call to `method` is allowed.
    ///
    /// Returns immediately for methods without a quota. If the token is
    /// cancelled while waiting, the wait is abandoned and the call goes
    /// ahead unthrottled.
    pub async fn wait(&self, method: &str, cancel: &CancellationToken) {
        let Some(limiter) = self.limiters.get(method) else {
            return;
        };

        counter!("pw_inventory_rate_limiter_waits_total", "method" => method.to_string())
            .increment(1);

        tokio::select! {
            biased;
            _ = limiter.until_ready() => {
                debug!(method = %method, "Rate limiter permit acquired");
            }
            _ = cancel.cancelled() => {
                warn!(
                    method = %method,
                    "Failed to wait for rate limiter, proceeding without throttling"
                );
            }
        }
    }
}

impl std::fmt::Debug for MethodRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRateLimiter")
            .field("methods", &self.limiters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn quotas(method: &str, quota: MethodQuota) -> HashMap<String, MethodQuota> {
        let mut map = HashMap::new();
        map.insert(method.to_string(), quota);
        map
    }

    #[tokio::test]
    async fn test_unlisted_method_not_throttled() {
        let limiter = MethodRateLimiter::assets_inventory_default();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..50 {
            limiter.wait("/some.Other/Method", &cancel).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!limiter.is_throttled("/some.Other/Method"));
        assert!(limiter.is_throttled(LIST_ASSETS_METHOD));
    }

    #[tokio::test]
    async fn test_concurrent_callers_respect_quota() {
        // 20 per second with burst 1 is one call every 50ms.
        let limiter = Arc::new(
            MethodRateLimiter::new(&quotas(
                "m",
                MethodQuota {
                    requests: 20,
                    period: Duration::from_secs(1),
                    burst: 1,
                },
            ))
            .unwrap(),
        );
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..2 {
                    limiter.wait("m", &cancel).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 8 calls need at least 7 replenish intervals.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_cancelled_wait_proceeds() {
        let limiter = MethodRateLimiter::new(&quotas(
            "slow",
            MethodQuota {
                requests: 1,
                period: Duration::from_secs(3600),
                burst: 1,
            },
        ))
        .unwrap();
        let cancel = CancellationToken::new();

        // Consumes the only permit.
        limiter.wait("slow", &cancel).await;

        cancel.cancel();
        let start = Instant::now();
        limiter.wait("slow", &cancel).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_quotas_rejected() {
        let zero_requests = MethodQuota {
            requests: 0,
            period: Duration::from_secs(60),
            burst: 1,
        };
        assert!(MethodRateLimiter::new(&quotas("m", zero_requests)).is_err());

        let zero_burst = MethodQuota {
            requests: 10,
            period: Duration::from_secs(60),
            burst: 0,
        };
        assert!(MethodRateLimiter::new(&quotas("m", zero_burst)).is_err());

        let zero_period = MethodQuota {
            requests: 10,
            period: Duration::ZERO,
            burst: 1,
        };
        assert!(MethodRateLimiter::new(&quotas("m", zero_period)).is_err());
    }
}
