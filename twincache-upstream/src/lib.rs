//! twincache Upstream - Device Name Sources
//!
//! Traits for the two services the cache aggregates names from, plus their
//! HTTP clients. Both services answer with nested property trees; the
//! clients flatten them into dotted names before returning.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use twincache_core::{NameSet, TwinCacheResult, UpstreamError};

pub mod iothub;
pub mod simulation;

pub use iothub::{DeviceListApiModel, IotHubManagerClient};
pub use simulation::{DeviceModelListApiModel, DeviceSimulationClient};

// ============================================================================
// NAME SOURCE TRAITS
// ============================================================================

/// Source of tag and reported-property names across all devices.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn twin_names(&self) -> TwinCacheResult<NameSet>;
}

/// Source of reported-property names declared by simulated device models.
#[async_trait]
pub trait SimulationRegistry: Send + Sync {
    async fn reported_property_names(&self) -> TwinCacheResult<BTreeSet<String>>;
}

#[async_trait]
impl<R: DeviceRegistry + ?Sized> DeviceRegistry for Arc<R> {
    async fn twin_names(&self) -> TwinCacheResult<NameSet> {
        (**self).twin_names().await
    }
}

#[async_trait]
impl<R: SimulationRegistry + ?Sized> SimulationRegistry for Arc<R> {
    async fn reported_property_names(&self) -> TwinCacheResult<BTreeSet<String>> {
        (**self).reported_property_names().await
    }
}

// ============================================================================
// HTTP HELPERS
// ============================================================================

pub(crate) fn request_failed(service: &str, status: u16, message: impl Into<String>) -> UpstreamError {
    UpstreamError::RequestFailed {
        service: service.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn invalid_response(service: &str, reason: impl Into<String>) -> UpstreamError {
    UpstreamError::InvalidResponse {
        service: service.to_string(),
        reason: reason.into(),
    }
}

/// GET `url` and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    service: &str,
    url: &str,
) -> TwinCacheResult<T> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_failed(service, 0, format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(request_failed(service, status.as_u16(), error_text).into());
    }

    response
        .json()
        .await
        .map_err(|e| invalid_response(service, format!("Failed to parse response: {}", e)).into())
}

pub(crate) fn trim_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}
