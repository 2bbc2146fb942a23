//! Retry policy for outbound calls.

use crate::error::{InventoryError, InventoryResult};
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Pause before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single pause.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 1.2,
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Pause after the failed attempt with index `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();

        if !secs.is_finite() || secs >= max {
            self.max_backoff
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Returns the pause before the next attempt, or `None` if `err` must be
    /// surfaced to the caller.
    pub fn should_retry(&self, err: &InventoryError, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() || attempt.saturating_add(1) >= self.max_attempts.max(1) {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached.
    pub async fn run<T, F, Fut>(
        &self,
        method: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> InventoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InventoryResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(InventoryError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(pause) = self.should_retry(&err, attempt) else {
                return Err(err);
            };

            warn!(
                method = %method,
                attempt = attempt + 1,
                error = %err,
                pause_ms = pause.as_millis() as u64,
                "Retrying request after transient error"
            );
            counter!("pw_inventory_retries_total", "method" => method.to_string()).increment(1);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InventoryError::Cancelled),
                _ = sleep(pause) => {}
            }
            attempt += 1;
        }
    }
}
