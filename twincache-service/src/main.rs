//! twincache Service Entry Point
//!
//! Loads configuration, wires the storage adapter and upstream clients into
//! a [`TwinCache`] and runs the refresh job until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use twincache_core::TwinCacheResult;
use twincache_service::{
    cache_refresh_task, init_tracing, RefreshJobConfig, ServiceConfig, TelemetryConfig, TwinCache,
};
use twincache_storage::StorageAdapterClient;
use twincache_upstream::{DeviceSimulationClient, IotHubManagerClient};

#[tokio::main]
async fn main() -> TwinCacheResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ServiceConfig::from_env()?;
    let job_config = RefreshJobConfig::from_env()?;

    let http = reqwest::Client::new();
    let cache = Arc::new(TwinCache::new(
        StorageAdapterClient::with_client(http.clone(), &config.storage_adapter_url),
        IotHubManagerClient::with_client(http.clone(), &config.iothub_manager_url),
        DeviceSimulationClient::with_client(http, &config.device_simulation_url),
        config.cache.clone(),
    ));

    tracing::info!(
        storage_adapter_url = %config.storage_adapter_url,
        iothub_manager_url = %config.iothub_manager_url,
        device_simulation_url = %config.device_simulation_url,
        whitelist = %config.cache.whitelist,
        ttl_secs = config.cache.ttl.as_secs(),
        rebuild_timeout_secs = config.cache.rebuild_timeout.as_secs(),
        "Starting twincache service"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = tokio::spawn(cache_refresh_task(cache, job_config, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = job.await {
        tracing::error!(error = %e, "Refresh task panicked");
    }

    Ok(())
}
