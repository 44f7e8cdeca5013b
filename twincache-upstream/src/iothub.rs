//! IoT Hub manager client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use twincache_core::{flatten_properties, NameSet, TwinCacheResult};

use crate::{get_json, trim_base_url, DeviceRegistry};

const SERVICE: &str = "iothub-manager";

/// Response of `GET /devices`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceListApiModel {
    #[serde(rename = "Items", default)]
    pub items: Option<Vec<DeviceTwinApiModel>>,
}

/// One device twin. Only the parts that carry names are decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceTwinApiModel {
    #[serde(rename = "Tags", default)]
    pub tags: Option<Map<String, Value>>,
    #[serde(rename = "Properties", default)]
    pub properties: Option<TwinPropertiesApiModel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwinPropertiesApiModel {
    #[serde(rename = "Reported", default)]
    pub reported: Option<Map<String, Value>>,
}

impl DeviceListApiModel {
    /// Flattened tag and reported-property names across all devices.
    pub fn twin_names(&self) -> NameSet {
        let mut names = NameSet::default();
        for device in self.items.iter().flatten() {
            if let Some(tags) = &device.tags {
                flatten_properties(&mut names.tags, tags);
            }
            if let Some(reported) = device.properties.as_ref().and_then(|p| p.reported.as_ref()) {
                flatten_properties(&mut names.reported_properties, reported);
            }
        }
        names
    }
}

/// HTTP client for the IoT Hub manager service.
#[derive(Debug, Clone)]
pub struct IotHubManagerClient {
    client: Client,
    base_url: String,
}

impl IotHubManagerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url),
        }
    }

    fn devices_url(&self) -> String {
        format!("{}/devices", self.base_url)
    }
}

#[async_trait]
impl DeviceRegistry for IotHubManagerClient {
    async fn twin_names(&self) -> TwinCacheResult<NameSet> {
        let devices: DeviceListApiModel = get_json(&self.client, SERVICE, &self.devices_url()).await?;
        let names = devices.twin_names();
        tracing::debug!(
            service = SERVICE,
            tags = names.tags.len(),
            reported = names.reported_properties.len(),
            "Fetched device twin names"
        );
        Ok(names)
    }
}
