//! twincache Test Utilities
//!
//! Shared test infrastructure for the twincache workspace:
//! - Scripted upstream registries with failure injection
//! - A store wrapper that interleaves competing writers
//! - Proptest generators for names, records and whitelists
//! - Fixtures and assertions for common scenarios

// Re-export the in-memory store from its source crate
pub use twincache_storage::InMemoryKeyValueStore;

pub use twincache_core::{
    CacheRecord, ETag, NameSet, StoredValue, TwinCacheError, TwinCacheResult, UpstreamError,
};

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use twincache_storage::{read_snapshot, write_value, KeyValueStore, ReadOutcome, WriteOutcome};
use twincache_upstream::{DeviceRegistry, SimulationRegistry};

/// Build a set of owned names.
pub fn name_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

// ============================================================================
// SCRIPTED UPSTREAM REGISTRIES
// ============================================================================

/// Call accounting and failure injection shared by the scripted registries.
#[derive(Debug, Default)]
struct Script {
    calls: AtomicU32,
    fail_first: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl Script {
    /// Count a call and decide whether it should fail.
    async fn enter(&self, service: &str) -> TwinCacheResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().ok().and_then(|guard| *guard);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.fail_first.load(Ordering::SeqCst) {
            return Err(UpstreamError::RequestFailed {
                service: service.to_string(),
                status: 503,
                message: format!("injected failure on call {}", call + 1),
            }
            .into());
        }
        Ok(())
    }
}

/// Device registry returning a fixed name set.
///
/// Clones share call counters, so a test can keep one handle and pass
/// another into the code under test.
#[derive(Debug, Clone)]
pub struct ScriptedDeviceRegistry {
    names: NameSet,
    script: Arc<Script>,
}

impl ScriptedDeviceRegistry {
    pub fn new(names: NameSet) -> Self {
        Self {
            names,
            script: Arc::new(Script::default()),
        }
    }

    /// Fail the first `n` calls with an upstream error.
    pub fn failing_first(self, n: u32) -> Self {
        self.script.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(self, delay: Duration) -> Self {
        if let Ok(mut guard) = self.script.delay.lock() {
            *guard = Some(delay);
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRegistry for ScriptedDeviceRegistry {
    async fn twin_names(&self) -> TwinCacheResult<NameSet> {
        self.script.enter("scripted-registry").await?;
        Ok(self.names.clone())
    }
}

/// Simulation registry returning a fixed set of property names.
#[derive(Debug, Clone)]
pub struct ScriptedSimulationRegistry {
    names: BTreeSet<String>,
    script: Arc<Script>,
}

impl ScriptedSimulationRegistry {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            script: Arc::new(Script::default()),
        }
    }

    /// Fail the first `n` calls with an upstream error.
    pub fn failing_first(self, n: u32) -> Self {
        self.script.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(self, delay: Duration) -> Self {
        if let Ok(mut guard) = self.script.delay.lock() {
            *guard = Some(delay);
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimulationRegistry for ScriptedSimulationRegistry {
    async fn reported_property_names(&self) -> TwinCacheResult<BTreeSet<String>> {
        self.script.enter("scripted-simulation").await?;
        Ok(self.names.clone())
    }
}

// ============================================================================
// CONFLICT INJECTION
// ============================================================================

/// What a simulated competing instance does right before a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interference {
    /// Reject the write without touching the store.
    Conflict,
    /// Replace the stored record wholesale.
    Overwrite(CacheRecord),
    /// Union names into the stored record, as a concurrent merge would.
    Merge(CacheRecord),
}

/// Store wrapper that lets a test interleave other writers.
///
/// Interference is scheduled by conditional-write index (zero-based). The
/// competing write goes through the inner store with the current etag, so
/// it changes the etag exactly like a real concurrent writer.
#[derive(Debug)]
pub struct ConflictInjectingStore<S> {
    inner: S,
    script: Mutex<HashMap<u64, Interference>>,
    writes: AtomicU64,
    injected: AtomicU64,
    read_delay: Option<Duration>,
    collection: String,
    key: String,
}

impl<S: KeyValueStore> ConflictInjectingStore<S> {
    /// Wrap `inner`; interference targets `collection:key`.
    pub fn new(inner: S, collection: &str, key: &str) -> Self {
        Self {
            inner,
            script: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
            injected: AtomicU64::new(0),
            read_delay: None,
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    /// Run `interference` just before the `index`-th conditional write.
    pub fn interfere_on(self, index: u64, interference: Interference) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.insert(index, interference);
        }
        self
    }

    /// Sleep after every read, so concurrent callers act on the same stale
    /// etag before any of them writes.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Conditional writes attempted through this wrapper.
    pub fn write_attempts(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Interferences that have fired.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    async fn competing_write(&self, record: &CacheRecord) -> TwinCacheResult<()> {
        let snapshot =
            read_snapshot::<CacheRecord, S>(&self.inner, &self.collection, &self.key).await?;
        write_value(
            &self.inner,
            &self.collection,
            &self.key,
            record,
            snapshot.etag.as_ref(),
        )
        .await?;
        Ok(())
    }

    async fn competing_merge(&self, record: &CacheRecord) -> TwinCacheResult<()> {
        let snapshot =
            read_snapshot::<CacheRecord, S>(&self.inner, &self.collection, &self.key).await?;
        let mut merged = snapshot.value.union(record);
        merged.rebuilding = snapshot.value.rebuilding;
        write_value(
            &self.inner,
            &self.collection,
            &self.key,
            &merged,
            snapshot.etag.as_ref(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for ConflictInjectingStore<S> {
    async fn get(&self, collection: &str, key: &str) -> TwinCacheResult<ReadOutcome> {
        let outcome = self.inner.get(collection, key).await?;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(outcome)
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: String,
        etag: Option<&ETag>,
    ) -> TwinCacheResult<WriteOutcome> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        let interference = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.remove(&index));

        if let Some(interference) = interference {
            self.injected.fetch_add(1, Ordering::SeqCst);
            match interference {
                Interference::Conflict => return Ok(WriteOutcome::Conflict),
                Interference::Overwrite(record) => self.competing_write(&record).await?,
                Interference::Merge(record) => self.competing_merge(&record).await?,
            }
        }

        self.inner.update(collection, key, data, etag).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for twincache types.

    use super::*;
    use proptest::collection::btree_set;
    use proptest::prelude::*;

    /// A dotted property name such as `Config.Interval`.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,6}(\\.[A-Za-z][A-Za-z0-9]{0,6}){0,2}"
    }

    pub fn arb_names(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
        btree_set(arb_name(), 0..max)
    }

    pub fn arb_name_set() -> impl Strategy<Value = NameSet> {
        (arb_names(8), arb_names(8)).prop_map(|(tags, reported_properties)| NameSet {
            tags,
            reported_properties,
        })
    }

    /// A committed (not rebuilding) record.
    pub fn arb_cache_record() -> impl Strategy<Value = CacheRecord> {
        (arb_names(8), arb_names(8)).prop_map(|(tags, reported)| CacheRecord {
            rebuilding: false,
            tags,
            reported,
        })
    }

    /// A whitelist token, valid or not.
    pub fn arb_whitelist_token() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_name().prop_map(|n| format!("tags.{}", n)),
            arb_name().prop_map(|n| format!("reported.{}", n)),
            arb_name().prop_map(|n| format!("Tags.{}*", n)),
            arb_name().prop_map(|n| format!("REPORTED.{}*", n)),
            arb_name(),
            Just("tags.".to_string()),
            Just("*".to_string()),
            Just(String::new()),
        ]
    }

    /// A comma-separated whitelist with irregular spacing.
    pub fn arb_whitelist_spec() -> impl Strategy<Value = String> {
        proptest::collection::vec((arb_whitelist_token(), " {0,2}"), 0..10).prop_map(|tokens| {
            tokens
                .into_iter()
                .map(|(token, pad)| format!("{}{}{}", pad, token, pad))
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;

    /// Whitelist mixing exact names and a prefix rule.
    pub const SCENARIO_WHITELIST: &str = "tags.Building, tags.Group, reported.Type, reported.Config.*";

    /// Registry knowing a mix of whitelisted and other names.
    pub fn scenario_registry() -> ScriptedDeviceRegistry {
        ScriptedDeviceRegistry::new(NameSet::new(
            ["Building", "Group", "Color"],
            ["Type", "Config.Interval", "Other"],
        ))
    }

    pub fn scenario_simulation() -> ScriptedSimulationRegistry {
        ScriptedSimulationRegistry::new(["MethodStatus"])
    }

    /// Serialize `record` and store it unconditionally.
    pub async fn seed_record(
        store: &InMemoryKeyValueStore,
        collection: &str,
        key: &str,
        record: &CacheRecord,
    ) -> StoredValue {
        let data = serde_json::to_string(record).unwrap_or_default();
        store.seed(collection, key, data).await
    }

    /// A record in the middle of a rebuild.
    pub fn rebuilding_record() -> CacheRecord {
        let mut record = CacheRecord::new(["Building"], ["Type"]);
        record.rebuilding = true;
        record
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for twincache-specific invariants.

    use super::*;

    /// Assert that `record` contains every name of `part`.
    #[track_caller]
    pub fn assert_contains_all(record: &CacheRecord, part: &CacheRecord) {
        assert!(
            record.tags.is_superset(&part.tags),
            "missing tags: {:?}",
            part.tags.difference(&record.tags).collect::<Vec<_>>()
        );
        assert!(
            record.reported.is_superset(&part.reported),
            "missing reported: {:?}",
            part.reported.difference(&record.reported).collect::<Vec<_>>()
        );
    }

    /// Assert that the stored record exists and is not flagged as rebuilding.
    pub async fn assert_stored_not_rebuilding(
        store: &InMemoryKeyValueStore,
        collection: &str,
        key: &str,
    ) -> CacheRecord {
        let stored = store
            .snapshot(collection, key)
            .await
            .unwrap_or_else(|| panic!("no record stored at {}:{}", collection, key));
        let record: CacheRecord = stored
            .decode()
            .unwrap_or_else(|e| panic!("stored record does not decode: {}", e));
        assert!(!record.rebuilding, "record left with rebuilding=true");
        record
    }
}
