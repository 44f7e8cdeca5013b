//! Optimistic write lock over a single key.
//!
//! The store has no locks, so mutual exclusion is emulated with a status
//! flag stored inside the protected value:
//!
//! 1. read the value and its etag
//! 2. let the caller decide whether work is needed
//! 3. conditionally write the value with the flag set (acquire)
//! 4. conditionally write the final value with the flag cleared, using the
//!    etag produced by step 3 (release)
//!
//! A conflict at step 3 or 4 means another writer won; the caller restarts
//! from step 1. The flag is advisory: a holder that crashes leaves it set,
//! and callers decide from `last_modified` when to take it over.

use serde::de::DeserializeOwned;
use serde::Serialize;
use twincache_core::{CacheRecord, ETag, StorageError, Timestamp, TwinCacheResult};

use super::traits::{KeyValueStore, ReadOutcome, WriteOutcome};

/// A value that carries its own advisory lock flag.
pub trait Lockable: Serialize + DeserializeOwned + Default + Clone + Send + Sync {
    fn is_locked(&self) -> bool;
    fn set_locked(&mut self, locked: bool);
}

impl Lockable for CacheRecord {
    fn is_locked(&self) -> bool {
        self.rebuilding
    }

    fn set_locked(&mut self, locked: bool) {
        self.rebuilding = locked;
    }
}

/// A decoded read of the protected key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub value: T,
    /// `None` when the key does not exist yet.
    pub etag: Option<ETag>,
    pub last_modified: Option<Timestamp>,
}

impl<T> Snapshot<T> {
    pub fn exists(&self) -> bool {
        self.etag.is_some()
    }

    /// Age at `now`, or `None` when the key does not exist.
    pub fn age(&self, now: Timestamp) -> Option<chrono::Duration> {
        self.last_modified.map(|modified| now - modified)
    }
}

/// Read and decode `collection:key`.
///
/// A missing key yields the default value without an etag. Data that fails
/// to decode yields the default value with the stored etag, so the next
/// conditional write replaces it.
pub async fn read_snapshot<T, S>(store: &S, collection: &str, key: &str) -> TwinCacheResult<Snapshot<T>>
where
    T: DeserializeOwned + Default,
    S: KeyValueStore + ?Sized,
{
    match store.get(collection, key).await? {
        ReadOutcome::NotFound => Ok(Snapshot {
            value: T::default(),
            etag: None,
            last_modified: None,
        }),
        ReadOutcome::Found(stored) => {
            let value = stored.decode::<T>().unwrap_or_else(|e| {
                tracing::warn!(
                    collection,
                    key,
                    error = %e,
                    "Stored value is not decodable, treating as empty"
                );
                T::default()
            });
            Ok(Snapshot {
                value,
                etag: Some(stored.etag),
                last_modified: Some(stored.last_modified),
            })
        }
    }
}

/// Serialize `value` and write it conditioned on `etag`.
pub async fn write_value<T, S>(
    store: &S,
    collection: &str,
    key: &str,
    value: &T,
    etag: Option<&ETag>,
) -> TwinCacheResult<WriteOutcome>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let data = serde_json::to_string(value).map_err(StorageError::from)?;
    store.update(collection, key, data, etag).await
}

/// Proof of a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a held lock blocks other writers until released or timed out"]
pub struct LockGuard<T> {
    etag: ETag,
    value: T,
}

impl<T> LockGuard<T> {
    /// Etag produced by the acquiring write.
    pub fn etag(&self) -> &ETag {
        &self.etag
    }

    /// Value as written by the acquire, flag set.
    pub fn value(&self) -> &T {
        &self.value
    }
}

/// Outcome of [`OptimisticWriteLock::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt<T> {
    Acquired(LockGuard<T>),
    /// The predicate declined; carries the snapshot it looked at.
    NotNeeded(Snapshot<T>),
    /// Someone else wrote between the read and the acquire.
    Conflict,
}

/// Single-key lock built on etag compare-and-swap.
#[derive(Debug)]
pub struct OptimisticWriteLock<'a, S: ?Sized> {
    store: &'a S,
    collection: &'a str,
    key: &'a str,
}

impl<'a, S: KeyValueStore + ?Sized> OptimisticWriteLock<'a, S> {
    pub fn new(store: &'a S, collection: &'a str, key: &'a str) -> Self {
        Self {
            store,
            collection,
            key,
        }
    }

    /// Read the key, ask `needed` whether work is required and, if so,
    /// set the flag with a conditional write.
    pub async fn try_lock<T, P>(&self, needed: P) -> TwinCacheResult<LockAttempt<T>>
    where
        T: Lockable,
        P: FnOnce(&Snapshot<T>) -> bool,
    {
        let snapshot = read_snapshot::<T, S>(self.store, self.collection, self.key).await?;
        if !needed(&snapshot) {
            return Ok(LockAttempt::NotNeeded(snapshot));
        }

        let mut locked = snapshot.value.clone();
        locked.set_locked(true);

        match write_value(
            self.store,
            self.collection,
            self.key,
            &locked,
            snapshot.etag.as_ref(),
        )
        .await?
        {
            WriteOutcome::Committed(stored) => {
                tracing::debug!(
                    collection = self.collection,
                    key = self.key,
                    etag = %stored.etag,
                    "Lock acquired"
                );
                Ok(LockAttempt::Acquired(LockGuard {
                    etag: stored.etag,
                    value: locked,
                }))
            }
            WriteOutcome::Conflict => {
                tracing::debug!(
                    collection = self.collection,
                    key = self.key,
                    "Lock acquire lost the race"
                );
                Ok(LockAttempt::Conflict)
            }
        }
    }

    /// Clear the flag, keeping the content seen at acquire time.
    ///
    /// Returns false if another writer has taken over in the meantime.
    pub async fn release<T: Lockable>(&self, guard: LockGuard<T>) -> TwinCacheResult<bool> {
        let LockGuard { etag, mut value } = guard;
        value.set_locked(false);
        self.commit(&etag, &value).await
    }

    /// Write `value` with the flag cleared, ending the critical section.
    ///
    /// Returns false if another writer has taken over in the meantime.
    pub async fn write_and_release<T: Lockable>(
        &self,
        guard: LockGuard<T>,
        mut value: T,
    ) -> TwinCacheResult<bool> {
        value.set_locked(false);
        self.commit(&guard.etag, &value).await
    }

    async fn commit<T: Lockable>(&self, etag: &ETag, value: &T) -> TwinCacheResult<bool> {
        let outcome = write_value(self.store, self.collection, self.key, value, Some(etag)).await?;
        if outcome.is_conflict() {
            tracing::warn!(
                collection = self.collection,
                key = self.key,
                "Lock was taken over before release"
            );
        }
        Ok(!outcome.is_conflict())
    }
}
