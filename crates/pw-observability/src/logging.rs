//! Logging infrastructure for Posture Warden.
//!
//! Structured logging through the tracing ecosystem. `RUST_LOG` wins over
//! the configured level when set.

use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV_VAR: &str = "PW_LOG_LEVEL";
pub const LOG_FORMAT_ENV_VAR: &str = "PW_LOG_FORMAT";

/// Errors from logging setup.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidFormat(other.to_string())),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level.
    pub level: Level,
    pub format: LogFormat,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: true,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Creates a production configuration with JSON output.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_location: false,
            include_target: true,
        }
    }

    /// Reads `PW_LOG_LEVEL` and `PW_LOG_FORMAT` over the defaults.
    pub fn from_env() -> Result<Self, LoggingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, LoggingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup(LOG_LEVEL_ENV_VAR) {
            config.level = Level::from_str(level.trim())
                .map_err(|_| LoggingError::InvalidLevel(level.clone()))?;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV_VAR) {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "pw_inventory={},pw_observability={}",
                self.level, self.level
            ))
        })
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let layer = fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(config.include_target);

    let result = match config.format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
    result.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Creates a span for one inventory operation.
#[macro_export]
macro_rules! inventory_span {
    ($operation:expr, $scope:expr) => {
        tracing::info_span!("inventory", operation = %$operation, scope = %$scope)
    };
    ($operation:expr, $scope:expr, $($field:tt)*) => {
        tracing::info_span!("inventory", operation = %$operation, scope = %$scope, $($field)*)
    };
}
