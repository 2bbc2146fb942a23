//! # pw-observability
//!
//! Logging and metrics setup for Posture Warden.
//!
//! This crate installs the tracing subscriber and describes the counters
//! the inventory engine emits.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::register_inventory_metrics;
