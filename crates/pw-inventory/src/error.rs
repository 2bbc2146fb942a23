//! Error types for the inventory engine.

use crate::asset::ContentType;
use thiserror::Error;

/// Errors that can occur while listing and aggregating cloud assets.
#[derive(Error, Debug, Clone)]
pub enum InventoryError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A primary listing stream could not be established or broke mid-way.
    #[error("Failed to list {content_type} assets of types {asset_types:?} in {parent}: {source}")]
    StreamFailed {
        parent: String,
        content_type: ContentType,
        asset_types: Vec<String>,
        #[source]
        source: Box<InventoryError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InventoryError {
    /// Returns true for the transient classes the retry policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::ResourceExhausted(_)
                | InventoryError::DeadlineExceeded(_)
                | InventoryError::Unavailable(_)
        )
    }

    /// Short machine-readable label, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            InventoryError::AuthenticationFailed(_) => "authentication_failed",
            InventoryError::PermissionDenied(_) => "permission_denied",
            InventoryError::ResourceExhausted(_) => "resource_exhausted",
            InventoryError::DeadlineExceeded(_) => "deadline_exceeded",
            InventoryError::Unavailable(_) => "unavailable",
            InventoryError::NotFound(_) => "not_found",
            InventoryError::RequestFailed(_) => "request_failed",
            InventoryError::InvalidResponse(_) => "invalid_response",
            InventoryError::ConfigError(_) => "config_error",
            InventoryError::StreamFailed { .. } => "stream_failed",
            InventoryError::Cancelled => "cancelled",
            InventoryError::Internal(_) => "internal",
        }
    }
}

/// Result type for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;
