//! Twin name cache facade.

use std::time::Duration;
use twincache_core::{CacheConfig, CacheRecord, TwinCacheResult};
use twincache_storage::{read_snapshot, Deadline, FixedBackoff, KeyValueStore};
use twincache_upstream::{DeviceRegistry, SimulationRegistry};

use crate::constants::{CacheLocation, DEFAULT_UPSTREAM_MAX_ATTEMPTS, DEFAULT_UPSTREAM_RETRY_DELAY_SECS};
use crate::discovery::NameDiscovery;
use crate::merge::merge_into_store;
use crate::rebuild::RebuildCoordinator;

/// Shared cache of device tag and reported-property names.
///
/// Any number of instances may run against the same store. They coordinate
/// only through etag-conditioned writes on the cache record.
#[derive(Debug)]
pub struct TwinCache<S, D, M> {
    store: S,
    discovery: NameDiscovery<D, M>,
    config: CacheConfig,
    backoff: FixedBackoff,
    location: CacheLocation,
}

impl<S, D, M> TwinCache<S, D, M>
where
    S: KeyValueStore,
    D: DeviceRegistry,
    M: SimulationRegistry,
{
    pub fn new(store: S, registry: D, simulation: M, config: CacheConfig) -> Self {
        let discovery = NameDiscovery::new(registry, simulation, config.parsed_whitelist());
        Self {
            store,
            discovery,
            config,
            backoff: FixedBackoff::new(
                Duration::from_secs(DEFAULT_UPSTREAM_RETRY_DELAY_SECS),
                DEFAULT_UPSTREAM_MAX_ATTEMPTS,
            ),
            location: CacheLocation::TWIN,
        }
    }

    /// Replace the upstream retry policy.
    pub fn with_backoff(mut self, backoff: FixedBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Store the record somewhere other than [`CacheLocation::TWIN`].
    pub fn with_location(mut self, location: CacheLocation) -> Self {
        self.location = location;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current cache record. A missing record reads as empty.
    pub async fn get_cache(&self) -> TwinCacheResult<CacheRecord> {
        let snapshot =
            read_snapshot::<CacheRecord, S>(&self.store, self.location.collection, self.location.key)
                .await?;
        if !snapshot.exists() {
            tracing::info!(
                collection = self.location.collection,
                key = self.location.key,
                "Cache get: cache was not found"
            );
        }
        Ok(snapshot.value)
    }

    /// Union `partial` into the stored record and return the result.
    pub async fn set_cache(
        &self,
        partial: &CacheRecord,
        deadline: Deadline,
    ) -> TwinCacheResult<CacheRecord> {
        merge_into_store(&self.store, self.location, partial, deadline).await
    }

    /// Rebuild the record from upstream if it is missing, empty, expired or
    /// abandoned mid-rebuild, or unconditionally when `force` is set.
    ///
    /// Returns `true` only if this call committed a rebuild. Running out of
    /// `deadline` under contention returns `false`.
    pub async fn try_rebuild_cache(&self, force: bool, deadline: Deadline) -> TwinCacheResult<bool> {
        let coordinator = RebuildCoordinator::new(
            &self.store,
            &self.discovery,
            &self.config,
            self.backoff,
            self.location,
        );

        match coordinator.run(force, deadline).await {
            Err(e) if e.is_deadline_exceeded() => {
                tracing::warn!(error = %e, "Cache rebuild gave up at deadline");
                Ok(false)
            }
            other => other,
        }
    }
}
