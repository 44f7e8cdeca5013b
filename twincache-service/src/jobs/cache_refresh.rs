//! Cache Refresh Background Task
//!
//! Keeps the shared twin name cache populated and fresh:
//!
//! - On startup, retries the initial build until it succeeds, because the
//!   upstream services may still be booting.
//! - Afterwards, asks for a rebuild every `update_interval`. Most ticks are
//!   skipped by the staleness check; one instance per TTL period does the
//!   actual work.
//!
//! Every call gets its own [`Deadline`] of `attempt_timeout`.
//!
//! # Configuration
//!
//! ```rust
//! use twincache_service::jobs::RefreshJobConfig;
//! use std::time::Duration;
//!
//! let config = RefreshJobConfig {
//!     init_retry_interval: Duration::from_secs(10),
//!     update_interval: Duration::from_secs(300),
//!     attempt_timeout: Duration::from_secs(90),
//! };
//! ```

use crate::cache::TwinCache;
use crate::constants::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_INIT_RETRY_SECS, DEFAULT_UPDATE_INTERVAL_SECS,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use twincache_core::{parse_secs_var, ConfigError};
use twincache_storage::{Deadline, KeyValueStore};
use twincache_upstream::{DeviceRegistry, SimulationRegistry};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache refresh background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshJobConfig {
    /// Delay between failed initial build attempts (default: 10 seconds)
    pub init_retry_interval: Duration,

    /// How often to check whether the cache needs a rebuild
    /// (default: 5 minutes)
    pub update_interval: Duration,

    /// Deadline for a single rebuild call (default: 90 seconds)
    pub attempt_timeout: Duration,
}

impl Default for RefreshJobConfig {
    fn default() -> Self {
        Self {
            init_retry_interval: Duration::from_secs(DEFAULT_INIT_RETRY_SECS),
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

impl RefreshJobConfig {
    /// Create RefreshJobConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINCACHE_INIT_RETRY_SECS`: Delay between initial build attempts (default: 10)
    /// - `TWINCACHE_UPDATE_INTERVAL_SECS`: Rebuild check interval (default: 300)
    /// - `TWINCACHE_ATTEMPT_TIMEOUT_SECS`: Deadline per rebuild call (default: 90)
    ///
    /// A set but unparsable value, or a zero interval or timeout, is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            init_retry_interval: Duration::from_secs(parse_secs_var(
                "TWINCACHE_INIT_RETRY_SECS",
                DEFAULT_INIT_RETRY_SECS,
            )?),
            update_interval: Duration::from_secs(parse_secs_var(
                "TWINCACHE_UPDATE_INTERVAL_SECS",
                DEFAULT_UPDATE_INTERVAL_SECS,
            )?),
            attempt_timeout: Duration::from_secs(parse_secs_var(
                "TWINCACHE_ATTEMPT_TIMEOUT_SECS",
                DEFAULT_ATTEMPT_TIMEOUT_SECS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero durations. A zero tick period cannot drive an interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("init_retry_interval", self.init_retry_interval),
            ("update_interval", self.update_interval),
            ("attempt_timeout", self.attempt_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for cache refresh activity.
#[derive(Debug, Default)]
pub struct CacheRefreshMetrics {
    /// Rebuilds committed by this instance
    pub rebuilds_committed: AtomicU64,

    /// Checks that found the cache fresh or already being rebuilt
    pub rebuilds_skipped: AtomicU64,

    /// Rebuild calls that returned an error
    pub failures: AtomicU64,

    /// Total rebuild calls made
    pub cycles: AtomicU64,
}

impl CacheRefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheRefreshSnapshot {
        CacheRefreshSnapshot {
            rebuilds_committed: self.rebuilds_committed.load(Ordering::Relaxed),
            rebuilds_skipped: self.rebuilds_skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRefreshSnapshot {
    pub rebuilds_committed: u64,
    pub rebuilds_skipped: u64,
    pub failures: u64,
    pub cycles: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that builds the cache on startup and keeps it fresh.
///
/// Runs until the shutdown signal is received and returns the metrics
/// collected during its lifetime.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_refresh_task(cache, RefreshJobConfig::default(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_refresh_task<S, D, M>(
    cache: Arc<TwinCache<S, D, M>>,
    config: RefreshJobConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CacheRefreshMetrics>
where
    S: KeyValueStore,
    D: DeviceRegistry,
    M: SimulationRegistry,
{
    let metrics = Arc::new(CacheRefreshMetrics::new());

    tracing::info!(
        init_retry_interval_secs = config.init_retry_interval.as_secs(),
        update_interval_secs = config.update_interval.as_secs(),
        attempt_timeout_secs = config.attempt_timeout.as_secs(),
        "Cache refresh task started"
    );

    // Initial build: retry until it succeeds or shutdown.
    loop {
        if *shutdown_rx.borrow() {
            return finish(metrics);
        }
        if refresh_once(&cache, &config, &metrics).await {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return finish(metrics);
                }
            }
            _ = tokio::time::sleep(config.init_retry_interval) => {}
        }
    }

    let mut update_interval = interval(config.update_interval);
    update_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately and the initial build just ran.
    update_interval.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache refresh task shutting down");
                    break;
                }
            }

            _ = update_interval.tick() => {
                refresh_once(&cache, &config, &metrics).await;
            }
        }
    }

    finish(metrics)
}

/// Make one rebuild call. Returns false if it failed.
async fn refresh_once<S, D, M>(
    cache: &TwinCache<S, D, M>,
    config: &RefreshJobConfig,
    metrics: &CacheRefreshMetrics,
) -> bool
where
    S: KeyValueStore,
    D: DeviceRegistry,
    M: SimulationRegistry,
{
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match cache
        .try_rebuild_cache(false, Deadline::after(config.attempt_timeout))
        .await
    {
        Ok(true) => {
            metrics.rebuilds_committed.fetch_add(1, Ordering::Relaxed);
            true
        }
        Ok(false) => {
            metrics.rebuilds_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Cache refresh cycle completed without rebuild");
            true
        }
        Err(e) => {
            metrics.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Cache refresh failed");
            false
        }
    }
}

fn finish(metrics: Arc<CacheRefreshMetrics>) -> Arc<CacheRefreshMetrics> {
    let snapshot = metrics.snapshot();
    tracing::info!(
        rebuilds_committed = snapshot.rebuilds_committed,
        rebuilds_skipped = snapshot.rebuilds_skipped,
        failures = snapshot.failures,
        cycles = snapshot.cycles,
        "Cache refresh task completed"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use twincache_core::{CacheConfig, NameSet};
    use twincache_storage::{FixedBackoff, InMemoryKeyValueStore};
    use twincache_test_utils::{ScriptedDeviceRegistry, ScriptedSimulationRegistry};

    type TestCache =
        TwinCache<InMemoryKeyValueStore, ScriptedDeviceRegistry, ScriptedSimulationRegistry>;

    fn test_cache(simulation: ScriptedSimulationRegistry) -> Arc<TestCache> {
        Arc::new(
            TwinCache::new(
                InMemoryKeyValueStore::new(),
                ScriptedDeviceRegistry::new(NameSet::new(["Building"], ["Type"])),
                simulation,
                CacheConfig::new().with_whitelist("tags.*"),
            )
            .with_backoff(FixedBackoff::new(Duration::from_millis(10), 1)),
        )
    }

    #[test]
    fn test_config_default() {
        let config = RefreshJobConfig::default();
        assert_eq!(
            config.init_retry_interval,
            Duration::from_secs(DEFAULT_INIT_RETRY_SECS)
        );
        assert_eq!(
            config.update_interval,
            Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS)
        );
        assert_eq!(
            config.attempt_timeout,
            Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS)
        );
    }

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    // One test owns these variables so parallel tests never race on them.
    #[test]
    fn test_config_from_env() {
        let _init = EnvVarGuard::set("TWINCACHE_INIT_RETRY_SECS", None);
        let _timeout = EnvVarGuard::set("TWINCACHE_ATTEMPT_TIMEOUT_SECS", None);
        let interval = EnvVarGuard::set("TWINCACHE_UPDATE_INTERVAL_SECS", None);
        assert_eq!(RefreshJobConfig::from_env().unwrap(), RefreshJobConfig::default());
        drop(interval);

        let interval = EnvVarGuard::set("TWINCACHE_UPDATE_INTERVAL_SECS", Some("0"));
        assert!(matches!(
            RefreshJobConfig::from_env(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "update_interval"
        ));
        drop(interval);

        let interval = EnvVarGuard::set("TWINCACHE_UPDATE_INTERVAL_SECS", Some("five"));
        assert!(matches!(
            RefreshJobConfig::from_env(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "TWINCACHE_UPDATE_INTERVAL_SECS"
        ));
        drop(interval);

        let _interval = EnvVarGuard::set("TWINCACHE_UPDATE_INTERVAL_SECS", Some(" 60 "));
        assert_eq!(
            RefreshJobConfig::from_env().unwrap().update_interval,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        assert!(RefreshJobConfig::default().validate().is_ok());

        let zero_timeout = RefreshJobConfig {
            attempt_timeout: Duration::ZERO,
            ..RefreshJobConfig::default()
        };
        assert!(matches!(
            zero_timeout.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "attempt_timeout"
        ));

        let zero_interval = RefreshJobConfig {
            update_interval: Duration::ZERO,
            ..RefreshJobConfig::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = CacheRefreshMetrics::new();
        metrics.cycles.fetch_add(3, Ordering::Relaxed);
        metrics.rebuilds_committed.fetch_add(1, Ordering::Relaxed);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.rebuilds_committed, 1);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_build_retries_until_upstream_ready() {
        let cache = test_cache(ScriptedSimulationRegistry::new(["MethodStatus"]).failing_first(2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = RefreshJobConfig {
            init_retry_interval: Duration::from_secs(1),
            update_interval: Duration::from_secs(300),
            attempt_timeout: Duration::from_secs(5),
        };

        let handle = tokio::spawn(cache_refresh_task(Arc::clone(&cache), config, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();

        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.rebuilds_committed, 1);
        assert!(cache.get_cache().await.unwrap().tags.contains("Building"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_skip_fresh_cache() {
        let cache = test_cache(ScriptedSimulationRegistry::new(["MethodStatus"]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = RefreshJobConfig {
            init_retry_interval: Duration::from_secs(1),
            update_interval: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(5),
        };

        let handle = tokio::spawn(cache_refresh_task(Arc::clone(&cache), config, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();

        assert_eq!(snapshot.rebuilds_committed, 1);
        assert_eq!(snapshot.rebuilds_skipped, 2);
        assert_eq!(snapshot.cycles, 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_returns_immediately() {
        let cache = test_cache(ScriptedSimulationRegistry::new(["MethodStatus"]));
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let metrics = cache_refresh_task(cache, RefreshJobConfig::default(), shutdown_rx).await;
        assert_eq!(metrics.snapshot().cycles, 0);
    }
}
