//! In-memory key-value store.
//!
//! Implements the same etag semantics as the storage adapter service, so
//! coordination logic can be exercised without a network. Uses
//! `tokio::sync::RwLock` for safe async access.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use twincache_core::{ETag, StoredValue, TwinCacheResult};

use super::traits::{KeyValueStore, ReadOutcome, WriteOutcome};

type SlotKey = (String, String);

fn slot(collection: &str, key: &str) -> SlotKey {
    (collection.to_string(), key.to_string())
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: tokio::sync::RwLock<HashMap<SlotKey, StoredValue>>,
    /// Number of applied writes.
    writes: AtomicU64,
    /// Number of rejected conditional writes.
    conflicts: AtomicU64,
}

impl InMemoryKeyValueStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value unconditionally, bypassing etag checks.
    ///
    /// Used to seed fixtures. Does not count as a write.
    pub async fn seed(&self, collection: &str, key: &str, data: impl Into<String>) -> StoredValue {
        let value = StoredValue {
            key: key.to_string(),
            data: data.into(),
            etag: ETag::generate(),
            last_modified: Utc::now(),
        };
        self.values
            .write()
            .await
            .insert(slot(collection, key), value.clone());
        value
    }

    /// Move `last_modified` of a stored value into the past, keeping its etag.
    ///
    /// Returns false if no value exists.
    pub async fn backdate(&self, collection: &str, key: &str, age: chrono::Duration) -> bool {
        let mut values = self.values.write().await;
        match values.get_mut(&slot(collection, key)) {
            Some(value) => {
                value.last_modified = Utc::now() - age;
                true
            }
            None => false,
        }
    }

    /// Current stored value, if any.
    pub async fn snapshot(&self, collection: &str, key: &str) -> Option<StoredValue> {
        self.values.read().await.get(&slot(collection, key)).cloned()
    }

    /// Number of applied writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of conditional writes rejected with a conflict.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, collection: &str, key: &str) -> TwinCacheResult<ReadOutcome> {
        let values = self.values.read().await;
        Ok(match values.get(&slot(collection, key)) {
            Some(value) => ReadOutcome::Found(value.clone()),
            None => ReadOutcome::NotFound,
        })
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: String,
        etag: Option<&ETag>,
    ) -> TwinCacheResult<WriteOutcome> {
        let mut values = self.values.write().await;
        let slot = slot(collection, key);

        let matches = match (values.get(&slot), etag) {
            (None, None) => true,
            (Some(current), Some(expected)) => current.etag == *expected,
            _ => false,
        };

        if !matches {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Ok(WriteOutcome::Conflict);
        }

        let value = StoredValue {
            key: key.to_string(),
            data,
            etag: ETag::generate(),
            last_modified: Utc::now(),
        };
        values.insert(slot, value.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);

        Ok(WriteOutcome::Committed(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.get("cache", "twin").await.unwrap(), ReadOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_create_requires_absent_value() {
        let store = InMemoryKeyValueStore::new();

        let first = store.update("cache", "twin", "1".to_string(), None).await.unwrap();
        assert!(matches!(first, WriteOutcome::Committed(_)));

        let second = store.update("cache", "twin", "2".to_string(), None).await.unwrap();
        assert!(second.is_conflict());
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.conflict_count(), 1);
    }

    #[tokio::test]
    async fn test_update_with_matching_etag_changes_etag() {
        let store = InMemoryKeyValueStore::new();
        let seeded = store.seed("cache", "twin", "old").await;

        let outcome = store
            .update("cache", "twin", "new".to_string(), Some(&seeded.etag))
            .await
            .unwrap();
        let WriteOutcome::Committed(written) = outcome else {
            panic!("expected commit");
        };
        assert_ne!(written.etag, seeded.etag);
        assert_eq!(written.data, "new");

        // The old etag is now stale.
        let stale = store
            .update("cache", "twin", "newer".to_string(), Some(&seeded.etag))
            .await
            .unwrap();
        assert!(stale.is_conflict());
        assert_eq!(store.snapshot("cache", "twin").await.unwrap().data, "new");
    }

    #[tokio::test]
    async fn test_etag_on_missing_value_conflicts() {
        let store = InMemoryKeyValueStore::new();
        let outcome = store
            .update("cache", "twin", "x".to_string(), Some(&ETag::new("ghost")))
            .await
            .unwrap();
        assert!(outcome.is_conflict());
    }

    #[tokio::test]
    async fn test_backdate_keeps_etag() {
        let store = InMemoryKeyValueStore::new();
        let seeded = store.seed("cache", "twin", "{}").await;
        assert!(store.backdate("cache", "twin", chrono::Duration::hours(2)).await);

        let after = store.snapshot("cache", "twin").await.unwrap();
        assert_eq!(after.etag, seeded.etag);
        assert!(after.age(Utc::now()) >= chrono::Duration::hours(2));
        assert!(!store.backdate("cache", "other", chrono::Duration::hours(1)).await);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryKeyValueStore::new();
        store.seed("cache", "twin", "a").await;
        assert_eq!(store.get("other", "twin").await.unwrap(), ReadOutcome::NotFound);
    }
}
