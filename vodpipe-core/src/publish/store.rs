use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{read_env_secret, StorageSection};
use crate::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage request for {key} failed: {message}")]
    Network { key: String, message: String },
    #[error("storage rejected {key} with HTTP {status}: {body}")]
    Status {
        key: String,
        status: u16,
        body: String,
    },
    #[error("invalid storage endpoint {0}")]
    InvalidEndpoint(String),
    #[error("request signing failed")]
    Signing,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value blob API the publisher writes to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// S3-compatible store using path-style PUT signed with SigV4.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    region: String,
    credentials: S3Credentials,
}

impl S3ObjectStore {
    pub fn new(
        client: Client,
        endpoint: &str,
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: S3Credentials,
    ) -> StoreResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| StoreError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.host_str().is_none() {
            return Err(StoreError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            region: region.into(),
            credentials,
        })
    }

    /// Reads credentials from the environment variables named in `section`.
    pub fn from_section(client: Client, section: &StorageSection) -> StoreResult<Self> {
        let credentials = S3Credentials {
            access_key_id: read_env_secret(&section.access_key_id_env)?,
            secret_access_key: read_env_secret(&section.secret_access_key_env)?,
        };
        Self::new(
            client,
            &section.endpoint,
            section.bucket.clone(),
            section.region.clone(),
            credentials,
        )
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn object_path(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.path().trim_end_matches('/'),
            uri_encode(&self.bucket),
            uri_encode(key)
        )
    }

    fn sign_put(
        &self,
        key: &str,
        payload_hash: &str,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SignedHeaders> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let host = self.host();
        let signed_headers = "content-type;host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "PUT\n{}\n\ncontent-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            self.object_path(key),
            content_type,
            host,
            payload_hash,
            amz_date,
            signed_headers,
            payload_hash
        );
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, b"s3")?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        Ok(SignedHeaders {
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
            amz_date,
        })
    }
}

struct SignedHeaders {
    authorization: String,
    amz_date: String,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        let payload_hash = hex::encode(Sha256::digest(&body));
        let signed = self.sign_put(key, &payload_hash, content_type, Utc::now())?;
        let url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            self.object_path(key)
        );
        let size = body.len();
        let response = self
            .client
            .put(url)
            .header("content-type", content_type)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", signed.amz_date)
            .header("authorization", signed.authorization)
            .body(body)
            .send()
            .await
            .map_err(|err| StoreError::Network {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                key: key.to_string(),
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        debug!(key, size, "object stored");
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> StoreResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StoreError::Signing)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encodes everything except unreserved characters and `/`.
fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
