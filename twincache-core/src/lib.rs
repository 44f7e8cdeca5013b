//! twincache Core - Data Types
//!
//! Pure data structures shared by every other crate: the cache record and
//! name sets, the storage envelope, whitelist parsing and the error types.
//! Coordination logic lives in `twincache-storage` and `twincache-service`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod flatten;
pub mod record;
pub mod whitelist;

pub use config::{parse_secs_var, CacheConfig};
pub use error::{ConfigError, StorageError, TwinCacheError, TwinCacheResult, UpstreamError};
pub use flatten::{flatten_properties, flatten_value};
pub use record::{CacheRecord, NameSet};
pub use whitelist::{classify_token, NameCategory, TokenKind, Whitelist, WhitelistToken};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Opaque version token handed out by the key-value store.
///
/// Changes on every successful write. It is the only compare-and-swap token
/// available, so it is never inspected, only echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh, time-sortable etag (UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// STORAGE ENVELOPE
// ============================================================================

/// A value as returned by the key-value store, with its version metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub key: String,
    /// Serialized payload (JSON for the cache record).
    pub data: String,
    pub etag: ETag,
    pub last_modified: Timestamp,
}

impl StoredValue {
    /// Time elapsed since the last write, as observed at `now`.
    ///
    /// Clock skew can make this negative; callers compare it against a
    /// positive threshold so a negative age simply reads as "fresh".
    pub fn age(&self, now: Timestamp) -> chrono::Duration {
        now - self.last_modified
    }

    /// Decode the payload as JSON.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}
