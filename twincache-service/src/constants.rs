//! Constants for the twincache service
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// STORAGE LOCATION
// ============================================================================

/// Collection and key of a value in the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLocation {
    pub collection: &'static str,
    pub key: &'static str,
}

impl CacheLocation {
    /// Where the shared twin name cache lives.
    pub const TWIN: CacheLocation = CacheLocation {
        collection: "cache",
        key: "twin",
    };
}

// ============================================================================
// UPSTREAM RETRY
// ============================================================================

/// Delay before retrying after an upstream service failed (10 seconds)
pub const DEFAULT_UPSTREAM_RETRY_DELAY_SECS: u64 = 10;

/// Upstream failures tolerated within one rebuild call
pub const DEFAULT_UPSTREAM_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// REFRESH JOB
// ============================================================================

/// Delay between failed initial build attempts (10 seconds)
pub const DEFAULT_INIT_RETRY_SECS: u64 = 10;

/// Interval between periodic rebuild checks (5 minutes)
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// Deadline for one rebuild call made by the job (90 seconds)
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 90;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "twincache_service=debug,info";
