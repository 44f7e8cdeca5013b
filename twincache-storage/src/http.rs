//! Storage adapter HTTP client.
//!
//! Talks to the storage adapter microservice, which exposes
//! `GET`/`PUT {base}/collections/{collection}/values/{key}` and reports
//! etag mismatches as `409 Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use twincache_core::{ETag, StorageError, StoredValue, Timestamp, TwinCacheResult};

use super::traits::{KeyValueStore, ReadOutcome, WriteOutcome};

/// Wire shape of a stored value.
#[derive(Debug, Clone, Deserialize)]
struct ValueApiModel {
    #[serde(rename = "Key", default)]
    key: String,
    #[serde(rename = "Data", default)]
    data: String,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "$metadata", default)]
    metadata: ValueMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ValueMetadata {
    #[serde(rename = "$modified")]
    modified: Option<String>,
}

/// Wire shape of a write request.
#[derive(Debug, Serialize)]
struct ValueRequest<'a> {
    #[serde(rename = "Data")]
    data: &'a str,
    #[serde(rename = "ETag", skip_serializing_if = "Option::is_none")]
    etag: Option<&'a str>,
}

/// Parse the adapter's modification timestamp.
///
/// A missing or unparsable timestamp reads as the Unix epoch, so a record
/// without one always looks old: a stale lock is taken over, never stuck.
fn parse_modified(raw: Option<&str>) -> Timestamp {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    /// Body carries a stored value.
    Value,
    /// No value at the key.
    NotFound,
    /// The etag did not match.
    Conflict,
    Failed,
}

/// Classify a `GET` response. Only 404 means "not found".
fn classify_read(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::NOT_FOUND => StatusClass::NotFound,
        status if status.is_success() => StatusClass::Value,
        _ => StatusClass::Failed,
    }
}

/// Classify a `PUT` response. 409 and 412 both mean a stale etag.
fn classify_write(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StatusClass::Conflict,
        status if status.is_success() => StatusClass::Value,
        _ => StatusClass::Failed,
    }
}

impl ValueApiModel {
    fn into_stored(self, fallback_key: &str) -> StoredValue {
        let last_modified = parse_modified(self.metadata.modified.as_deref());
        StoredValue {
            key: if self.key.is_empty() {
                fallback_key.to_string()
            } else {
                self.key
            },
            data: self.data,
            etag: ETag::new(self.etag),
            last_modified,
        }
    }
}

/// HTTP client for the storage adapter service.
#[derive(Debug, Clone)]
pub struct StorageAdapterClient {
    client: Client,
    base_url: String,
}

impl StorageAdapterClient {
    /// Create a client for the adapter at `base_url` (e.g. `http://storage:9022/v1`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn value_url(&self, collection: &str, key: &str) -> String {
        format!("{}/collections/{}/values/{}", self.base_url, collection, key)
    }

    async fn failure(
        operation: &str,
        collection: &str,
        key: &str,
        response: reqwest::Response,
    ) -> StorageError {
        let status = response.status().as_u16();
        let reason = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        StorageError::RequestFailed {
            operation: operation.to_string(),
            collection: collection.to_string(),
            key: key.to_string(),
            status,
            reason,
        }
    }

    async fn decode(
        collection: &str,
        key: &str,
        response: reqwest::Response,
    ) -> Result<StoredValue, StorageError> {
        let model: ValueApiModel =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidPayload {
                    collection: collection.to_string(),
                    key: key.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                })?;
        Ok(model.into_stored(key))
    }
}

#[async_trait]
impl KeyValueStore for StorageAdapterClient {
    async fn get(&self, collection: &str, key: &str) -> TwinCacheResult<ReadOutcome> {
        let response = self
            .client
            .get(self.value_url(collection, key))
            .send()
            .await
            .map_err(|e| StorageError::Unavailable {
                reason: format!("HTTP request failed: {}", e),
            })?;

        match classify_read(response.status()) {
            StatusClass::NotFound => Ok(ReadOutcome::NotFound),
            StatusClass::Value => {
                Ok(ReadOutcome::Found(Self::decode(collection, key, response).await?))
            }
            StatusClass::Conflict | StatusClass::Failed => {
                Err(Self::failure("get", collection, key, response).await.into())
            }
        }
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: String,
        etag: Option<&ETag>,
    ) -> TwinCacheResult<WriteOutcome> {
        let body = ValueRequest {
            data: &data,
            etag: etag.map(ETag::as_str),
        };

        let response = self
            .client
            .put(self.value_url(collection, key))
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable {
                reason: format!("HTTP request failed: {}", e),
            })?;

        match classify_write(response.status()) {
            StatusClass::Conflict => {
                tracing::debug!(collection, key, "Storage adapter rejected stale etag");
                Ok(WriteOutcome::Conflict)
            }
            StatusClass::Value => Ok(WriteOutcome::Committed(
                Self::decode(collection, key, response).await?,
            )),
            StatusClass::NotFound | StatusClass::Failed => {
                Err(Self::failure("update", collection, key, response).await.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_model_parses_adapter_payload() {
        let json = r#"{
            "Key": "twin",
            "Data": "{\"Rebuilding\":false,\"Tags\":[\"Building\"],\"Reported\":[]}",
            "ETag": "\"0x8D5F\"",
            "$metadata": { "$type": "Value;1", "$modified": "2018-03-05T10:15:30+00:00" }
        }"#;
        let model: ValueApiModel = serde_json::from_str(json).unwrap();
        let stored = model.into_stored("twin");

        assert_eq!(stored.key, "twin");
        assert_eq!(stored.etag.as_str(), "\"0x8D5F\"");
        assert_eq!(stored.last_modified.to_rfc3339(), "2018-03-05T10:15:30+00:00");
        let record: twincache_core::CacheRecord = stored.decode().unwrap();
        assert!(record.tags.contains("Building"));
    }

    #[test]
    fn test_missing_modified_reads_as_epoch() {
        let model: ValueApiModel =
            serde_json::from_str(r#"{ "Data": "{}", "ETag": "1" }"#).unwrap();
        let stored = model.into_stored("twin");
        assert_eq!(stored.key, "twin");
        assert_eq!(stored.last_modified, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_unparsable_modified_reads_as_epoch() {
        assert_eq!(parse_modified(Some("yesterday")), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_request_omits_absent_etag() {
        let create = serde_json::to_string(&ValueRequest { data: "{}", etag: None }).unwrap();
        assert_eq!(create, r#"{"Data":"{}"}"#);

        let update = serde_json::to_string(&ValueRequest {
            data: "{}",
            etag: Some("abc"),
        })
        .unwrap();
        assert_eq!(update, r#"{"Data":"{}","ETag":"abc"}"#);
    }

    #[test]
    fn test_read_status_mapping() {
        assert_eq!(classify_read(StatusCode::OK), StatusClass::Value);
        assert_eq!(classify_read(StatusCode::NOT_FOUND), StatusClass::NotFound);
        // A conflict on read is not a missing value.
        assert_eq!(classify_read(StatusCode::CONFLICT), StatusClass::Failed);
        assert_eq!(classify_read(StatusCode::INTERNAL_SERVER_ERROR), StatusClass::Failed);
        assert_eq!(classify_read(StatusCode::SERVICE_UNAVAILABLE), StatusClass::Failed);
    }

    #[test]
    fn test_write_status_mapping() {
        assert_eq!(classify_write(StatusCode::OK), StatusClass::Value);
        assert_eq!(classify_write(StatusCode::CREATED), StatusClass::Value);
        assert_eq!(classify_write(StatusCode::CONFLICT), StatusClass::Conflict);
        assert_eq!(
            classify_write(StatusCode::PRECONDITION_FAILED),
            StatusClass::Conflict
        );
        // A write that 404s is an error, never a silent conflict.
        assert_eq!(classify_write(StatusCode::NOT_FOUND), StatusClass::Failed);
        assert_eq!(classify_write(StatusCode::BAD_REQUEST), StatusClass::Failed);
        assert_eq!(classify_write(StatusCode::BAD_GATEWAY), StatusClass::Failed);
    }

    #[test]
    fn test_value_url_trims_trailing_slash() {
        let client = StorageAdapterClient::new("http://storage:9022/v1/");
        assert_eq!(
            client.value_url("cache", "twin"),
            "http://storage:9022/v1/collections/cache/values/twin"
        );
    }
}
