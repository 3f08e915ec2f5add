use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::{read_env_secret, IngestSection};
use crate::error::ConfigError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest prefix is empty")]
    EmptyPrefix,
    #[error("ingest public base is empty")]
    EmptyPublicBase,
    #[error("ingest request failed: {0}")]
    Network(String),
    #[error("ingest rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Forward slashes, no leading slash, exactly one trailing slash.
pub fn ensure_prefix(prefix: &str) -> String {
    let normalized = prefix.trim().replace('\\', "/");
    let mut normalized = normalized.trim_start_matches('/').to_string();
    if !normalized.is_empty() && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestRequest {
    pub r2_prefix: String,
    pub r2_public_base: String,
    pub has_4k: bool,
}

impl IngestRequest {
    pub fn new(prefix: &str, public_base: &str, has_4k: bool) -> IngestResult<Self> {
        let r2_prefix = ensure_prefix(prefix);
        if r2_prefix.is_empty() {
            return Err(IngestError::EmptyPrefix);
        }
        let r2_public_base = public_base.trim().to_string();
        if r2_public_base.is_empty() {
            return Err(IngestError::EmptyPublicBase);
        }
        Ok(Self {
            r2_prefix,
            r2_public_base,
            has_4k,
        })
    }
}

/// Tells the catalog that a published package exists.
#[async_trait]
pub trait CatalogIngest: Send + Sync {
    async fn notify(&self, request: &IngestRequest) -> IngestResult<Value>;
}

#[derive(Clone)]
pub struct HttpCatalogIngest {
    client: Client,
    url: String,
    key: String,
}

impl fmt::Debug for HttpCatalogIngest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCatalogIngest")
            .field("url", &self.url)
            .finish()
    }
}

impl HttpCatalogIngest {
    pub fn new(client: Client, url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            key: key.into(),
        }
    }

    pub fn from_section(client: Client, section: &IngestSection) -> IngestResult<Self> {
        let key = read_env_secret(&section.key_env)?;
        Ok(Self::new(client, section.url.trim(), key))
    }
}

#[async_trait]
impl CatalogIngest for HttpCatalogIngest {
    async fn notify(&self, request: &IngestRequest) -> IngestResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-ingest-key", &self.key)
            .json(request)
            .send()
            .await
            .map_err(|err| IngestError::Network(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| IngestError::Network(err.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !status.is_success() || !ok {
            return Err(IngestError::Rejected {
                status: status.as_u16(),
                body: if body.is_null() { text } else { body.to_string() },
            });
        }
        info!(prefix = %request.r2_prefix, has_4k = request.has_4k, "catalog ingest accepted");
        Ok(body)
    }
}
