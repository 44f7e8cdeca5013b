//! Device simulation client.
//!
//! Device models declare the reported properties their simulated devices
//! will send. Those names are published even before any simulated device
//! has reported them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use twincache_core::{flatten_properties, TwinCacheResult};

use crate::{get_json, trim_base_url, SimulationRegistry};

const SERVICE: &str = "device-simulation";

/// Response of `GET /devicemodels`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceModelListApiModel {
    #[serde(rename = "Items", default)]
    pub items: Option<Vec<DeviceModelApiModel>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceModelApiModel {
    #[serde(rename = "Properties", default)]
    pub properties: Option<Map<String, Value>>,
}

impl DeviceModelListApiModel {
    pub fn property_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for model in self.items.iter().flatten() {
            if let Some(properties) = &model.properties {
                flatten_properties(&mut names, properties);
            }
        }
        names
    }
}

/// HTTP client for the device simulation service.
#[derive(Debug, Clone)]
pub struct DeviceSimulationClient {
    client: Client,
    base_url: String,
}

impl DeviceSimulationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url),
        }
    }

    fn device_models_url(&self) -> String {
        format!("{}/devicemodels", self.base_url)
    }
}

#[async_trait]
impl SimulationRegistry for DeviceSimulationClient {
    async fn reported_property_names(&self) -> TwinCacheResult<BTreeSet<String>> {
        let models: DeviceModelListApiModel =
            get_json(&self.client, SERVICE, &self.device_models_url()).await?;
        let names = models.property_names();
        tracing::debug!(service = SERVICE, reported = names.len(), "Fetched device model properties");
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names_flatten_models() {
        let json = r#"{
            "Items": [
                { "Id": "chiller-01", "Properties": { "Type": "Chiller", "Firmware": "1.0", "Location": { "Building": "43", "Floor": 2 } } },
                { "Id": "elevator-01", "Properties": { "Type": "Elevator", "Online": true } },
                { "Id": "empty" }
            ]
        }"#;
        let model: DeviceModelListApiModel = serde_json::from_str(json).unwrap();
        assert_eq!(
            model.property_names().into_iter().collect::<Vec<_>>(),
            vec!["Firmware", "Location.Building", "Location.Floor", "Online", "Type"]
        );
    }

    #[test]
    fn test_no_items_yields_empty_set() {
        let model: DeviceModelListApiModel = serde_json::from_str(r#"{ "Items": [] }"#).unwrap();
        assert!(model.property_names().is_empty());
    }

    #[test]
    fn test_device_models_url() {
        let client = DeviceSimulationClient::new("http://sim:9003/v1");
        assert_eq!(client.device_models_url(), "http://sim:9003/v1/devicemodels");
    }
}
