//! Object storage for report templates and rendered reports.
//!
//! [`BucketStore`] is the raw key/value surface of one bucket. The template
//! and report adapters in [`adapters`] layer the naming rules on top of it.

mod adapters;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

pub use adapters::{
    BucketReportStore, BucketTemplateStore, ReportStore, TemplateStore, DEFAULT_TEMPLATE_SUFFIX,
};
pub use memory::{MemoryBucketStore, StoredObject};

/// Object metadata key carrying the report TTL token.
pub const TTL_METADATA_KEY: &str = "ttl";

/// Connection settings for an S3-compatible backend. One config per bucket;
/// use [`S3Config::with_bucket`] to share the rest.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..self.clone()
        }
    }

    /// Static credentials win when both halves are set; otherwise the default
    /// provider chain applies.
    async fn client(&self) -> Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&self.access_key_id, &self.secret_access_key) {
            loader = loader.credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                access_key, secret_key, None, None, "reporter",
            )));
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(self.force_path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Client::from_conf(builder.build())
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("invalid object storage configuration: {0}")]
    Configuration(String),
    #[error("object storage request for '{key}' failed: {message}")]
    Request { key: String, message: String },
    #[error("object not found: {0}")]
    NotFound(String),
}

impl BucketError {
    pub fn request(key: &str, message: impl ToString) -> Self {
        Self::Request {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Writes `bytes` under `key`. A `ttl` is handed to the backend untouched.
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        ttl: Option<&str>,
    ) -> Result<(), BucketError>;

    async fn get_object(&self, key: &str) -> Result<Bytes, BucketError>;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
    bucket: String,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.bucket.trim().is_empty() {
            return Err(BucketError::Configuration("bucket name is empty".into()));
        }
        let client = config.client().await;
        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        ttl: Option<&str>,
    ) -> Result<(), BucketError> {
        debug!(bucket = %self.bucket, key, size = bytes.len(), "put object");
        let metadata: Option<HashMap<String, String>> = ttl
            .filter(|ttl| !ttl.is_empty())
            .map(|ttl| [(TTL_METADATA_KEY.to_string(), ttl.to_string())].into());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(metadata)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| BucketError::request(key, DisplayErrorContext(err)))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, BucketError> {
        debug!(bucket = %self.bucket, key, "get object");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_key());
                if missing {
                    BucketError::NotFound(key.to_string())
                } else {
                    BucketError::request(key, DisplayErrorContext(err))
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| BucketError::request(key, err))?;
        Ok(body.into_bytes())
    }
}
