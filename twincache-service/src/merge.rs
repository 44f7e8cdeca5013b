//! Convergent merge writer.
//!
//! Callers submit partial name sets; each one is unioned into the stored
//! record with an etag-conditioned write, re-reading and re-merging on every
//! conflict. Since union only grows the sets, no contribution is ever lost
//! and the final record does not depend on arrival order.

use twincache_core::{CacheRecord, TwinCacheResult};
use twincache_storage::{
    read_snapshot, retry_until, write_value, Attempt, Deadline, KeyValueStore, WriteOutcome,
};

use crate::constants::CacheLocation;

const OPERATION: &str = "merge cache";

/// Union `partial` into the record stored at `location`.
///
/// Returns the merged record. When the stored record already contains every
/// submitted name nothing is written.
pub async fn merge_into_store<S>(
    store: &S,
    location: CacheLocation,
    partial: &CacheRecord,
    deadline: Deadline,
) -> TwinCacheResult<CacheRecord>
where
    S: KeyValueStore + ?Sized,
{
    retry_until(OPERATION, deadline, |attempt| async move {
        let snapshot = deadline
            .run(
                OPERATION,
                read_snapshot::<CacheRecord, S>(store, location.collection, location.key),
            )
            .await?;

        let merged = snapshot.value.union(partial);
        if merged.name_counts() == snapshot.value.name_counts() {
            tracing::debug!(
                collection = location.collection,
                key = location.key,
                "Cache already contains all submitted names"
            );
            return Ok(Attempt::Done(merged));
        }

        let outcome = deadline
            .run(
                OPERATION,
                write_value(
                    store,
                    location.collection,
                    location.key,
                    &merged,
                    snapshot.etag.as_ref(),
                ),
            )
            .await?;

        match outcome {
            WriteOutcome::Committed(_) => {
                let (tags, reported) = merged.name_counts();
                tracing::debug!(attempt, tags, reported, "Cache updated");
                Ok(Attempt::Done(merged))
            }
            WriteOutcome::Conflict => {
                tracing::info!(attempt, "Cache updating: failed due to conflict, retrying");
                Ok(Attempt::Retry)
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use twincache_storage::{InMemoryKeyValueStore, Snapshot};

    const LOC: CacheLocation = CacheLocation::TWIN;

    async fn stored(store: &InMemoryKeyValueStore) -> Snapshot<CacheRecord> {
        read_snapshot(store, LOC.collection, LOC.key).await.unwrap()
    }

    #[tokio::test]
    async fn test_merge_into_missing_record_creates_it() {
        let store = InMemoryKeyValueStore::new();
        let partial = CacheRecord::new(["Building"], ["Type"]);

        let merged = merge_into_store(&store, LOC, &partial, Deadline::never())
            .await
            .unwrap();

        assert_eq!(merged, partial);
        assert_eq!(stored(&store).await.value, partial);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_unions_with_existing() {
        let store = InMemoryKeyValueStore::new();
        let existing = CacheRecord::new(["a", "y", "z"], ["1", "2", "3"]);
        store
            .seed(LOC.collection, LOC.key, serde_json::to_string(&existing).unwrap())
            .await;

        let partial = CacheRecord::new(["a", "y", "z", "@", "#"], ["2", "3", "11", "12"]);
        let merged = merge_into_store(&store, LOC, &partial, Deadline::never())
            .await
            .unwrap();

        let expected = CacheRecord::new(["a", "y", "z", "@", "#"], ["1", "2", "3", "11", "12"]);
        assert_eq!(merged, expected);
        assert_eq!(stored(&store).await.value, expected);
    }

    #[tokio::test]
    async fn test_subset_submission_does_not_write() {
        let store = InMemoryKeyValueStore::new();
        let existing = CacheRecord::new(["a", "b"], ["1"]);
        let seeded = store
            .seed(LOC.collection, LOC.key, serde_json::to_string(&existing).unwrap())
            .await;

        let merged = merge_into_store(&store, LOC, &CacheRecord::new(["a"], ["1"]), Deadline::never())
            .await
            .unwrap();

        assert_eq!(merged, existing);
        assert_eq!(store.write_count(), 0);
        assert_eq!(stored(&store).await.etag, Some(seeded.etag));
    }

    #[tokio::test]
    async fn test_undecodable_record_is_overwritten() {
        let store = InMemoryKeyValueStore::new();
        store.seed(LOC.collection, LOC.key, "garbage").await;

        let partial = CacheRecord::new(["Building"], Vec::<String>::new());
        merge_into_store(&store, LOC, &partial, Deadline::never())
            .await
            .unwrap();
        assert_eq!(stored(&store).await.value, partial);
    }

    #[tokio::test]
    async fn test_merge_write_clears_rebuilding_flag() {
        let store = InMemoryKeyValueStore::new();
        let mut existing = CacheRecord::new(["a"], ["1"]);
        existing.rebuilding = true;
        store
            .seed(LOC.collection, LOC.key, serde_json::to_string(&existing).unwrap())
            .await;

        let merged = merge_into_store(&store, LOC, &CacheRecord::new(["b"], ["1"]), Deadline::never())
            .await
            .unwrap();
        assert!(!merged.rebuilding);
        assert_eq!(merged.tags.len(), 2);
    }
}
