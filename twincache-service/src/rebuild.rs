//! Rebuild coordinator.
//!
//! One rebuild cycle:
//!
//! ```text
//! CHECK ──skip──────────────────────────────────────────> DONE(false)
//!   │ needed
//!   v
//! LOCK_ACQUIRE ──conflict──> CHECK
//!   │
//!   v
//! GATHER_NAMES ──failure──> release lock, BACKOFF ──> CHECK
//!   │
//!   v
//! WRITE_RESULT ──conflict──> CHECK
//!   │
//!   v
//! DONE(true)
//! ```
//!
//! Conflicts restart without limit until the caller's deadline passes.
//! Upstream failures are bounded by a [`FixedBackoff`].

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use twincache_core::{CacheConfig, CacheRecord, Timestamp, TwinCacheResult, UpstreamError};
use twincache_storage::{
    retry_until, Attempt, Deadline, FixedBackoff, KeyValueStore, LockAttempt, OptimisticWriteLock,
    Snapshot,
};
use twincache_upstream::{DeviceRegistry, SimulationRegistry};

use crate::constants::CacheLocation;
use crate::discovery::NameDiscovery;

const OPERATION: &str = "rebuild cache";

// ============================================================================
// NEED-BUILD DECISION
// ============================================================================

/// Outcome of the staleness check, with the reason it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDecision {
    /// The caller forced a rebuild.
    Forced,
    /// No record exists yet.
    Missing,
    /// A rebuild flag was left behind longer than the rebuild timeout.
    StaleLock,
    /// Another instance is rebuilding right now.
    LockHeld,
    /// The record holds no names.
    Empty,
    /// The record is older than the TTL.
    Expired,
    /// The record is fresh.
    Fresh,
}

impl BuildDecision {
    pub fn is_needed(&self) -> bool {
        !matches!(self, BuildDecision::LockHeld | BuildDecision::Fresh)
    }
}

impl fmt::Display for BuildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            BuildDecision::Forced => "rebuild forced",
            BuildDecision::Missing => "no cache found",
            BuildDecision::StaleLock => "last rebuild timed out",
            BuildDecision::LockHeld => "another instance is rebuilding",
            BuildDecision::Empty => "cache is empty",
            BuildDecision::Expired => "cache expired",
            BuildDecision::Fresh => "cache not expired",
        };
        f.write_str(reason)
    }
}

/// True when `age` is strictly greater than `limit`.
fn older_than(age: chrono::Duration, limit: std::time::Duration) -> bool {
    match chrono::Duration::from_std(limit) {
        Ok(limit) => age > limit,
        // A limit too large to represent is never exceeded.
        Err(_) => false,
    }
}

/// Decide whether the stored record must be rebuilt.
pub fn need_build(
    force: bool,
    snapshot: &Snapshot<CacheRecord>,
    config: &CacheConfig,
    now: Timestamp,
) -> BuildDecision {
    if force {
        return BuildDecision::Forced;
    }

    let Some(age) = snapshot.age(now) else {
        return BuildDecision::Missing;
    };

    if snapshot.value.rebuilding {
        if older_than(age, config.rebuild_timeout) {
            BuildDecision::StaleLock
        } else {
            BuildDecision::LockHeld
        }
    } else if snapshot.value.is_empty() {
        BuildDecision::Empty
    } else if older_than(age, config.ttl) {
        BuildDecision::Expired
    } else {
        BuildDecision::Fresh
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Drives rebuild cycles against one cache location.
pub struct RebuildCoordinator<'a, S: ?Sized, D, M> {
    store: &'a S,
    discovery: &'a NameDiscovery<D, M>,
    config: &'a CacheConfig,
    backoff: FixedBackoff,
    location: CacheLocation,
}

impl<'a, S, D, M> RebuildCoordinator<'a, S, D, M>
where
    S: KeyValueStore + ?Sized,
    D: DeviceRegistry,
    M: SimulationRegistry,
{
    pub fn new(
        store: &'a S,
        discovery: &'a NameDiscovery<D, M>,
        config: &'a CacheConfig,
        backoff: FixedBackoff,
        location: CacheLocation,
    ) -> Self {
        Self {
            store,
            discovery,
            config,
            backoff,
            location,
        }
    }

    /// Run cycles until one commits a rebuild (`true`) or finds none is
    /// needed (`false`).
    ///
    /// Fails with `DeadlineExceeded` if contention outlasts `deadline`, and
    /// with `UpstreamError::RetriesExhausted` once the upstream services have
    /// failed `backoff.max_attempts` times. The lock is released before
    /// either error is returned.
    pub async fn run(&self, force: bool, deadline: Deadline) -> TwinCacheResult<bool> {
        let failures = AtomicU32::new(0);
        retry_until(OPERATION, deadline, |_| {
            let failures = &failures;
            async move { self.cycle(force, deadline, failures).await }
        })
        .await
    }

    async fn cycle(
        &self,
        force: bool,
        deadline: Deadline,
        failures: &AtomicU32,
    ) -> TwinCacheResult<Attempt<bool>> {
        let lock = OptimisticWriteLock::new(self.store, self.location.collection, self.location.key);
        let now = Utc::now();

        let attempt = deadline
            .run(
                OPERATION,
                lock.try_lock::<CacheRecord, _>(|snapshot| {
                    let decision = need_build(force, snapshot, self.config, now);
                    tracing::info!(
                        collection = self.location.collection,
                        key = self.location.key,
                        rebuild = decision.is_needed(),
                        reason = %decision,
                        "Cache rebuild check"
                    );
                    decision.is_needed()
                }),
            )
            .await?;

        let guard = match attempt {
            LockAttempt::NotNeeded(_) => return Ok(Attempt::Done(false)),
            LockAttempt::Conflict => {
                tracing::warn!("Cache rebuilding: lock failed due to conflict, retrying");
                return Ok(Attempt::Retry);
            }
            LockAttempt::Acquired(guard) => guard,
        };

        let names = match deadline.run(OPERATION, self.discovery.gather()).await {
            Ok(names) => names,
            Err(e) => {
                // Let other instances proceed while this one waits.
                lock.release(guard).await?;

                if e.is_deadline_exceeded() {
                    return Err(e);
                }

                let failed = failures.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.backoff.allows(failed) {
                    tracing::error!(attempts = failed, error = %e, "Upstream services unavailable, giving up");
                    return Err(UpstreamError::RetriesExhausted {
                        attempts: failed,
                        last_error: e.to_string(),
                    }
                    .into());
                }

                tracing::warn!(
                    attempt = failed,
                    retry_in_secs = self.backoff.delay.as_secs(),
                    error = %e,
                    "Some upstream service is not ready, retrying"
                );
                deadline.sleep(OPERATION, self.backoff.delay).await?;
                return Ok(Attempt::Retry);
            }
        };

        let record = CacheRecord::from_names(names);
        let (tags, reported) = record.name_counts();
        if lock.write_and_release(guard, record).await? {
            tracing::info!(tags, reported, "Cache rebuilt");
            Ok(Attempt::Done(true))
        } else {
            tracing::warn!("Cache rebuilding: write failed due to conflict, retrying");
            Ok(Attempt::Retry)
        }
    }
}
