//! Cache configuration

use crate::error::ConfigError;
use crate::whitelist::Whitelist;
use std::time::Duration;

/// Default lifetime of a committed cache record (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default age after which a `rebuilding` flag is considered abandoned.
pub const DEFAULT_REBUILD_TIMEOUT_SECS: u64 = 20;

/// Default whitelist: every tag, plus the reported properties the UI filters on.
pub const DEFAULT_CACHE_WHITELIST: &str = "tags.*, reported.Type, reported.Config.*";

/// Configuration consumed by the cache coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whitelist specification string, see [`Whitelist::parse`].
    pub whitelist: String,
    /// A committed record older than this is rebuilt.
    pub ttl: Duration,
    /// A `rebuilding` flag older than this is taken over.
    pub rebuild_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            whitelist: DEFAULT_CACHE_WHITELIST.to_string(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            rebuild_timeout: Duration::from_secs(DEFAULT_REBUILD_TIMEOUT_SECS),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the whitelist specification.
    pub fn with_whitelist(mut self, whitelist: impl Into<String>) -> Self {
        self.whitelist = whitelist.into();
        self
    }

    /// Set the record TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the stale-lock timeout.
    pub fn with_rebuild_timeout(mut self, timeout: Duration) -> Self {
        self.rebuild_timeout = timeout;
        self
    }

    /// Parse the configured whitelist.
    pub fn parsed_whitelist(&self) -> Whitelist {
        Whitelist::parse(&self.whitelist)
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINCACHE_CACHE_WHITELIST`: Whitelist specification (default: [`DEFAULT_CACHE_WHITELIST`])
    /// - `TWINCACHE_CACHE_TTL_SECS`: Record TTL in seconds (default: 3600)
    /// - `TWINCACHE_REBUILD_TIMEOUT_SECS`: Stale-lock timeout in seconds (default: 20)
    pub fn from_env() -> Result<Self, ConfigError> {
        let whitelist = std::env::var("TWINCACHE_CACHE_WHITELIST")
            .unwrap_or_else(|_| DEFAULT_CACHE_WHITELIST.to_string());

        let ttl = Duration::from_secs(parse_secs_var(
            "TWINCACHE_CACHE_TTL_SECS",
            DEFAULT_CACHE_TTL_SECS,
        )?);

        let rebuild_timeout = Duration::from_secs(parse_secs_var(
            "TWINCACHE_REBUILD_TIMEOUT_SECS",
            DEFAULT_REBUILD_TIMEOUT_SECS,
        )?);

        let config = Self {
            whitelist,
            ttl,
            rebuild_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make every record permanently stale.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ttl".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.rebuild_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "rebuild_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Read a seconds value from the environment, falling back to `default`
/// when unset. A set but unparsable value is an error.
pub fn parse_secs_var(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
            reason: "must be a whole number of seconds".to_string(),
        }),
        Err(_) => Ok(default),
    }
}
