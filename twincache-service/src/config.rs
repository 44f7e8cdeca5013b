//! Service configuration
//!
//! Collaborator endpoints plus the cache settings from `twincache-core`.

use twincache_core::{CacheConfig, ConfigError};

/// Everything the service binary needs to wire up a [`crate::TwinCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base URL of the storage adapter (e.g. `http://storage-adapter:9022/v1`)
    pub storage_adapter_url: String,
    /// Base URL of the IoT Hub manager (e.g. `http://iothub-manager:9002/v1`)
    pub iothub_manager_url: String,
    /// Base URL of the device simulation service
    pub device_simulation_url: String,
    pub cache: CacheConfig,
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingRequired {
            field: name.to_string(),
        }),
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINCACHE_STORAGE_ADAPTER_URL` (required)
    /// - `TWINCACHE_IOTHUB_MANAGER_URL` (required)
    /// - `TWINCACHE_DEVICE_SIMULATION_URL` (required)
    /// - plus the cache settings read by [`CacheConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            storage_adapter_url: required_var("TWINCACHE_STORAGE_ADAPTER_URL")?,
            iothub_manager_url: required_var("TWINCACHE_IOTHUB_MANAGER_URL")?,
            device_simulation_url: required_var("TWINCACHE_DEVICE_SIMULATION_URL")?,
            cache: CacheConfig::from_env()?,
        })
    }
}
