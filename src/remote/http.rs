//! REST implementation of [`RemoteApi`].
//!
//! Routes are `{base}/{collection}` for inserts and
//! `{base}/{collection}/{record_id}` for updates and deletes. Record ids are
//! percent-encoded as a single path segment. Inserts send the record id as
//! the body's `id` field.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::debug;

use super::{Collection, Record, RemoteApi, RemoteError};
use crate::config::RemoteConfig;
use crate::error::SyncError;

/// HTTP client for the property-management backend.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemote {
    /// Create a client for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build a client from the `remote` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL is configured.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, SyncError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| SyncError::Config("remote.base_url is not set".to_string()))?;
        Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("Invalid remote.base_url {base_url}: {e}")))?;

        let remote = Self::new(base_url);
        Ok(match &config.api_key {
            Some(key) => remote.with_api_key(key.clone()),
            None => remote,
        })
    }

    fn collection_url(&self, collection: Collection) -> Result<Url, RemoteError> {
        self.endpoint(&[collection.as_str()])
    }

    fn record_url(&self, collection: Collection, record_id: &str) -> Result<Url, RemoteError> {
        self.endpoint(&[collection.as_str(), record_id])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::new(format!("Invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::new(format!("Base URL cannot hold a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// The record's fields plus its `id`.
    fn insert_body(record_id: &str, record: &Record) -> Result<Value, RemoteError> {
        let mut body = serde_json::to_value(record)
            .map_err(|e| RemoteError::new(format!("Invalid record: {e}")))?;
        let fields = body
            .as_object_mut()
            .ok_or_else(|| RemoteError::new("Record did not serialize to an object"))?;
        fields.insert("id".to_string(), Value::String(record_id.to_string()));
        Ok(body)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        if body.is_empty() {
            Err(RemoteError::new(format!("HTTP {status}")))
        } else {
            Err(RemoteError::new(body))
        }
    }

    async fn read_record(response: Response) -> Result<serde_json::Value, RemoteError> {
        let text = Self::check(response).await?.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::new(format!("Invalid response body: {e}")))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn insert(
        &self,
        record_id: &str,
        record: &Record,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.collection_url(record.collection())?;
        let body = Self::insert_body(record_id, record)?;
        debug!(%url, "POST");

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        Self::read_record(response).await
    }

    async fn update(
        &self,
        record_id: &str,
        record: &Record,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.record_url(record.collection(), record_id)?;
        debug!(%url, "PATCH");

        let response = self
            .authorize(self.client.patch(url))
            .json(record)
            .send()
            .await?;
        Self::read_record(response).await
    }

    async fn delete(&self, collection: Collection, record_id: &str) -> Result<(), RemoteError> {
        let url = self.record_url(collection, record_id)?;
        debug!(%url, "DELETE");

        let response = self.authorize(self.client.delete(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
