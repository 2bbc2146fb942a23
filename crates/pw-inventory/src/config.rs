//! YAML configuration for the inventory engine.
//!
//! Only `scope` is required. Everything else falls back to defaults that
//! match the public asset API quotas.

use crate::asset::{
    Scope, COMPUTE_FIREWALL_ASSET_TYPE, COMPUTE_INSTANCE_ASSET_TYPE, COMPUTE_NETWORK_ASSET_TYPE,
    COMPUTE_SUBNETWORK_ASSET_TYPE, GKE_CLUSTER_ASSET_TYPE, IAM_SERVICE_ACCOUNT_ASSET_TYPE,
    IAM_SERVICE_ACCOUNT_KEY_ASSET_TYPE, MONITORING_ALERT_POLICY_ASSET_TYPE,
    MONITORING_LOG_METRIC_ASSET_TYPE, STORAGE_BUCKET_ASSET_TYPE,
};
use crate::error::InventoryError;
use crate::pipeline::DEFAULT_CHANNEL_CAPACITY;
use crate::rate_limiter::{MethodQuota, MethodRateLimiter, LIST_ASSETS_METHOD};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the root scope.
pub const SCOPE_ENV_VAR: &str = "PW_INVENTORY_SCOPE";

/// Environment variable carrying the bearer access token.
pub const ACCESS_TOKEN_ENV_VAR: &str = "PW_ACCESS_TOKEN";

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid quota for method '{method}': {message}")]
    InvalidQuota { method: String, message: String },

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for InventoryError {
    fn from(err: ConfigError) -> Self {
        InventoryError::ConfigError(err.to_string())
    }
}

/// Top-level inventory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Root scope, `projects/<id>` or `organizations/<id>`.
    pub scope: Scope,
    /// Types listed by the by-type aggregation when the caller passes none.
    #[serde(default = "default_asset_types")]
    pub asset_types: Vec<String>,
    /// Types listed per project by the by-project aggregation.
    #[serde(default = "default_project_asset_types")]
    pub project_asset_types: Vec<String>,
    #[serde(default)]
    pub monitoring: MonitoringTypes,
    /// Per-method quotas, keyed by full API method name.
    #[serde(default = "default_quotas")]
    pub quotas: HashMap<String, QuotaConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Queue size between pipeline stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Bearer token for the REST transport.
    #[serde(default, skip_serializing)]
    pub access_token: Option<AccessToken>,
}

/// Asset types of the two monitoring categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringTypes {
    #[serde(default = "default_log_metric_types")]
    pub log_metrics: Vec<String>,
    #[serde(default = "default_alert_types")]
    pub alerts: Vec<String>,
}

impl Default for MonitoringTypes {
    fn default() -> Self {
        Self {
            log_metrics: default_log_metric_types(),
            alerts: default_alert_types(),
        }
    }
}

/// Quota of one API method as written in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub requests: u32,
    pub period_secs: u64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl From<QuotaConfig> for MethodQuota {
    fn from(quota: QuotaConfig) -> Self {
        MethodQuota {
            requests: quota.requests,
            period: Duration::from_secs(quota.period_secs),
            burst: quota.burst,
        }
    }
}

/// Retry policy as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            multiplier: 1.2,
            max_attempts: 10,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

/// REST endpoints of the two collaborator APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub asset_api: String,
    pub resource_manager_api: String,
    pub timeout_secs: u64,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            asset_api: "https://cloudasset.googleapis.com".to_string(),
            resource_manager_api: "https://cloudresourcemanager.googleapis.com".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Bearer token. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

fn default_asset_types() -> Vec<String> {
    [
        COMPUTE_INSTANCE_ASSET_TYPE,
        COMPUTE_FIREWALL_ASSET_TYPE,
        COMPUTE_NETWORK_ASSET_TYPE,
        STORAGE_BUCKET_ASSET_TYPE,
        IAM_SERVICE_ACCOUNT_ASSET_TYPE,
        IAM_SERVICE_ACCOUNT_KEY_ASSET_TYPE,
        GKE_CLUSTER_ASSET_TYPE,
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

fn default_project_asset_types() -> Vec<String> {
    [
        COMPUTE_INSTANCE_ASSET_TYPE,
        COMPUTE_SUBNETWORK_ASSET_TYPE,
        STORAGE_BUCKET_ASSET_TYPE,
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

fn default_log_metric_types() -> Vec<String> {
    vec![MONITORING_LOG_METRIC_ASSET_TYPE.to_string()]
}

fn default_alert_types() -> Vec<String> {
    vec![MONITORING_ALERT_POLICY_ASSET_TYPE.to_string()]
}

fn default_quotas() -> HashMap<String, QuotaConfig> {
    let mut quotas = HashMap::new();
    quotas.insert(
        LIST_ASSETS_METHOD.to_string(),
        QuotaConfig {
            requests: 100,
            period_secs: 60,
            burst: 1,
        },
    );
    quotas
}

fn default_burst() -> u32 {
    1
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl InventoryConfig {
    /// Configuration with defaults for everything but the scope.
    pub fn for_scope(scope: Scope) -> Self {
        Self {
            scope,
            asset_types: default_asset_types(),
            project_asset_types: default_project_asset_types(),
            monitoring: MonitoringTypes::default(),
            quotas: default_quotas(),
            retry: RetryConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            endpoints: EndpointsConfig::default(),
            access_token: None,
        }
    }

    /// Loads, applies environment overrides, and validates.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: InventoryConfig = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates, without environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: InventoryConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `PW_INVENTORY_SCOPE` and `PW_ACCESS_TOKEN`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(scope) = lookup(SCOPE_ENV_VAR) {
            self.scope = scope
                .parse()
                .map_err(|e: InventoryError| ConfigError::InvalidValue(e.to_string()))?;
        }
        if let Some(token) = lookup(ACCESS_TOKEN_ENV_VAR).filter(|t| !t.is_empty()) {
            self.access_token = Some(AccessToken::new(token));
        }
        Ok(())
    }

    /// Checks value ranges and that every quota can be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(format!(
                "retry.multiplier must be >= 1.0, got {}",
                retry.multiplier
            )));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidValue(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }

        if self.endpoints.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "endpoints.timeout_secs must be > 0".to_string(),
            ));
        }

        self.rate_limiter()?;
        Ok(())
    }

    pub fn method_quotas(&self) -> HashMap<String, MethodQuota> {
        self.quotas
            .iter()
            .map(|(method, quota)| (method.clone(), MethodQuota::from(*quota)))
            .collect()
    }

    pub fn rate_limiter(&self) -> Result<MethodRateLimiter, ConfigError> {
        MethodRateLimiter::new(&self.method_quotas())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.endpoints.timeout_secs)
    }
}
