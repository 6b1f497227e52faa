//! # HTTP Inventory Client
//!
//! `reqwest` client for the inventory REST API:
//!
//! | Call | Request |
//! |---|---|
//! | read | `GET {base}/{type}/{id}/` |
//! | list | `GET {base}/{type}/?field=value` |
//! | partial_update | `PATCH {base}/{type}/{id}/` with `X-Expected-State` |
//! | delete | `DELETE {base}/{type}/{id}/` |
//!
//! Responses may be bare or wrapped in a `{"content": ...}` envelope.
//! Reads retry server and network errors with exponential backoff. Mutations
//! are sent once: a lost response to an applied conditional update would
//! otherwise come back as a rejected precondition.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{InventoryClient, InventoryError, InventoryResult, ListFilters, PartialUpdate};
use crate::config::InventoryConfig;
use crate::constants::{AUTH_TOKEN_HEADER, EXPECTED_STATE_HEADER};
use crate::credentials::CredentialProvider;
use crate::models::{InventoryRecord, RecordType, ResourceId};

#[derive(Clone)]
pub struct HttpInventoryClient {
    client: Client,
    config: InventoryConfig,
    base_url: Url,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl std::fmt::Debug for HttpInventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInventoryClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout_ms", &self.config.timeout_ms)
            .field("max_retries", &self.config.max_retries)
            .field("auth_enabled", &self.credentials.is_some())
            .finish()
    }
}

impl HttpInventoryClient {
    /// Create a client; `credentials` adds an auth token to every request
    pub fn new(
        config: InventoryConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> InventoryResult<Self> {
        // Url::join drops the last path segment unless the base ends in '/'
        let mut raw = config.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| InventoryError::Configuration(format!("Invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("lifecycle-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                InventoryError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        info!(
            base_url = %base_url,
            timeout_ms = config.timeout_ms,
            auth_enabled = credentials.is_some(),
            "Created inventory API client"
        );

        Ok(Self {
            client,
            config,
            base_url,
            credentials,
        })
    }

    fn collection_url(&self, record_type: RecordType) -> InventoryResult<Url> {
        self.base_url
            .join(&format!("{}/", record_type.path_segment()))
            .map_err(|e| InventoryError::Configuration(format!("Failed to construct URL: {e}")))
    }

    fn record_url(&self, record_type: RecordType, id: ResourceId) -> InventoryResult<Url> {
        self.base_url
            .join(&format!("{}/{}/", record_type.path_segment(), id))
            .map_err(|e| InventoryError::Configuration(format!("Failed to construct URL: {e}")))
    }

    async fn request(&self, method: Method, url: Url) -> InventoryResult<RequestBuilder> {
        let mut builder = self.client.request(method, url);
        if let Some(credentials) = &self.credentials {
            let token = credentials.get_valid_token().await?;
            builder = builder.header(AUTH_TOKEN_HEADER, token);
        }
        Ok(builder)
    }

    /// GET with retry on 5xx and network errors; 404 maps to `None`
    async fn get_json(&self, url: Url) -> InventoryResult<Option<Value>> {
        let mut retries = 0;
        loop {
            let request = self.request(Method::GET, url.clone()).await?;
            let last_error = match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp
                        .json::<Value>()
                        .await
                        .map_err(|e| InventoryError::Decode(e.to_string()))?;
                    return Ok(Some(body));
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    debug!(url = %url, "Inventory record not found");
                    return Ok(None);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let error = Self::error_from_response(resp).await;
                    // Don't retry client errors (4xx)
                    if status.is_client_error() {
                        error!(url = %url, status = %status, error = %error, "Client error reading inventory");
                        return Err(error);
                    }
                    warn!(
                        url = %url,
                        status = %status,
                        retry = retries + 1,
                        max_retries = self.config.max_retries,
                        "Server error reading inventory, will retry"
                    );
                    error
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        error = %e,
                        retry = retries + 1,
                        max_retries = self.config.max_retries,
                        "Network error reading inventory, will retry"
                    );
                    InventoryError::transport(e.to_string())
                }
            };

            retries += 1;
            if retries >= self.config.max_retries {
                error!(
                    url = %url,
                    retries = retries,
                    error = %last_error,
                    "Giving up reading inventory"
                );
                return Err(last_error);
            }

            let backoff = self
                .config
                .retry_backoff_ms
                .saturating_mul(1u64 << (retries - 1).min(16));
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    async fn error_from_response(resp: Response) -> InventoryError {
        let status = resp.status().as_u16();
        let message = resp
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        InventoryError::http(status, message)
    }

    fn unwrap_envelope(body: Value) -> Value {
        match body {
            Value::Object(mut map) if map.contains_key("content") => {
                map.remove("content").unwrap_or(Value::Null)
            }
            other => other,
        }
    }

    fn decode_record(body: Value) -> InventoryResult<InventoryRecord> {
        serde_json::from_value(Self::unwrap_envelope(body))
            .map_err(|e| InventoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn read(
        &self,
        record_type: RecordType,
        id: ResourceId,
    ) -> InventoryResult<Option<InventoryRecord>> {
        let url = self.record_url(record_type, id)?;
        match self.get_json(url).await? {
            Some(body) => Ok(Some(Self::decode_record(body)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        record_type: RecordType,
        filters: &ListFilters,
    ) -> InventoryResult<Vec<InventoryRecord>> {
        let mut url = self.collection_url(record_type)?;
        {
            let mut query = url.query_pairs_mut();
            for (field, value) in &filters.filters {
                query.append_pair(field, value);
            }
            if let Some(limit) = filters.limit {
                query.append_pair("limit", &limit.to_string());
            }
        }

        let body = match self.get_json(url).await? {
            Some(body) => Self::unwrap_envelope(body),
            None => return Ok(Vec::new()),
        };
        let mut records: Vec<InventoryRecord> =
            serde_json::from_value(body).map_err(|e| InventoryError::Decode(e.to_string()))?;
        if let Some(limit) = filters.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn partial_update(
        &self,
        record_type: RecordType,
        id: ResourceId,
        update: &PartialUpdate,
    ) -> InventoryResult<bool> {
        let url = self.record_url(record_type, id)?;
        let mut request = self.request(Method::PATCH, url.clone()).await?.json(&update.fields);
        if let Some(expected) = update.expected_state {
            request = request.header(EXPECTED_STATE_HEADER, expected.code().to_string());
        }

        debug!(
            url = %url,
            expected_state = ?update.expected_state,
            new_state = ?update.new_state(),
            "Sending inventory partial update"
        );

        let resp = request
            .send()
            .await
            .map_err(|e| InventoryError::transport(e.to_string()))?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                debug!(url = %url, status = %resp.status(), "Inventory update rejected");
                Ok(false)
            }
            _ => Err(Self::error_from_response(resp).await),
        }
    }

    async fn delete(&self, record_type: RecordType, id: ResourceId) -> InventoryResult<bool> {
        let url = self.record_url(record_type, id)?;
        let resp = self
            .request(Method::DELETE, url.clone())
            .await?
            .send()
            .await
            .map_err(|e| InventoryError::transport(e.to_string()))?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::error_from_response(resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_keep_base_path() {
        let client = HttpInventoryClient::new(
            InventoryConfig {
                base_url: "http://inventory.local/api".to_string(),
                ..Default::default()
            },
            None,
        )
        .unwrap();

        assert_eq!(
            client.record_url(RecordType::VirtualMachine, 42).unwrap().as_str(),
            "http://inventory.local/api/vm/42/"
        );
        assert_eq!(
            client.collection_url(RecordType::Project).unwrap().as_str(),
            "http://inventory.local/api/project/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpInventoryClient::new(
            InventoryConfig {
                base_url: "not a url".to_string(),
                ..Default::default()
            },
            None,
        );
        assert!(matches!(result, Err(InventoryError::Configuration(_))));
    }

    #[test]
    fn test_envelope_is_unwrapped() {
        let body = serde_json::json!({"content": {"id": 1, "state": 4}});
        let record = HttpInventoryClient::decode_record(body).unwrap();
        assert_eq!(record.id, 1);
    }
}
