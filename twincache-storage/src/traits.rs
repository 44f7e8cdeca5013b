//! Key-value store trait and outcome types.
//!
//! The store is eventually consistent and offers exactly one synchronization
//! primitive: a single-key write conditioned on the etag the caller last
//! observed. "Not found" and "etag mismatch" are ordinary outcomes, not
//! errors, so coordination loops can match on them directly.

use async_trait::async_trait;
use std::sync::Arc;
use twincache_core::{ETag, StoredValue, TwinCacheResult};

/// Result of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(StoredValue),
    NotFound,
}

impl ReadOutcome {
    pub fn found(self) -> Option<StoredValue> {
        match self {
            ReadOutcome::Found(value) => Some(value),
            ReadOutcome::NotFound => None,
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; carries the new value and its fresh etag.
    Committed(StoredValue),
    /// The etag did not match the stored one. Nothing was written.
    Conflict,
}

impl WriteOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteOutcome::Conflict)
    }
}

/// Remote key-value storage with ETag compare-and-swap.
///
/// # Conditional write semantics
///
/// - `etag == Some(e)`: applied only if the stored etag equals `e`.
/// - `etag == None`: applied only if no value exists yet (create).
///
/// Every applied write produces a new etag and a new `last_modified`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value with its version metadata.
    async fn get(&self, collection: &str, key: &str) -> TwinCacheResult<ReadOutcome>;

    /// Conditionally write a value.
    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: String,
        etag: Option<&ETag>,
    ) -> TwinCacheResult<WriteOutcome>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, collection: &str, key: &str) -> TwinCacheResult<ReadOutcome> {
        (**self).get(collection, key).await
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: String,
        etag: Option<&ETag>,
    ) -> TwinCacheResult<WriteOutcome> {
        (**self).update(collection, key, data, etag).await
    }
}
