//! Error types for twincache operations

use thiserror::Error;

/// Key-value storage errors.
///
/// "Not found" and "etag conflict" are not errors: the store reports them as
/// outcome variants so callers can pattern match instead of catching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage request {operation} on {collection}:{key} failed with status {status}: {reason}")]
    RequestFailed {
        operation: String,
        collection: String,
        key: String,
        status: u16,
        reason: String,
    },

    #[error("Storage adapter unreachable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid payload for {collection}:{key}: {reason}")]
    InvalidPayload {
        collection: String,
        key: String,
        reason: String,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors from the upstream device services (registry and simulation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Request to {service} failed with status {status}: {message}")]
    RequestFailed {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Upstream services still unavailable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all twincache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TwinCacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },
}

impl TwinCacheError {
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Whether the failure came from an upstream device service.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for twincache operations.
pub type TwinCacheResult<T> = Result<T, TwinCacheError>;

// =============================================================================
// TESTS
// =============================================================================
