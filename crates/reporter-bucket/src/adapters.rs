use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::{BucketError, BucketStore};

pub const DEFAULT_TEMPLATE_SUFFIX: &str = ".tpl";

/// Read side of the template bucket.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetches the template named `name`; the backend key carries the template suffix.
    async fn get(&self, name: &str) -> Result<Bytes, BucketError>;
}

/// Write side of the report bucket.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Stores a rendered artifact. An empty `ttl` disables expiry.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Bytes,
        ttl: &str,
    ) -> Result<(), BucketError>;
}

#[derive(Clone)]
pub struct BucketTemplateStore {
    bucket: Arc<dyn BucketStore>,
    suffix: String,
}

impl BucketTemplateStore {
    pub fn new(bucket: Arc<dyn BucketStore>) -> Self {
        Self::with_suffix(bucket, DEFAULT_TEMPLATE_SUFFIX)
    }

    pub fn with_suffix(bucket: Arc<dyn BucketStore>, suffix: impl Into<String>) -> Self {
        Self {
            bucket,
            suffix: suffix.into(),
        }
    }

    pub fn object_key(&self, name: &str) -> String {
        format!("{name}{}", self.suffix)
    }
}

#[async_trait]
impl TemplateStore for BucketTemplateStore {
    async fn get(&self, name: &str) -> Result<Bytes, BucketError> {
        let key = self.object_key(name);
        debug!(%key, "fetching template");
        self.bucket.get_object(&key).await
    }
}

#[derive(Clone)]
pub struct BucketReportStore {
    bucket: Arc<dyn BucketStore>,
}

impl BucketReportStore {
    pub fn new(bucket: Arc<dyn BucketStore>) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl ReportStore for BucketReportStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Bytes,
        ttl: &str,
    ) -> Result<(), BucketError> {
        debug!(%key, content_type, size = bytes.len(), "storing report");
        let ttl = (!ttl.is_empty()).then_some(ttl);
        self.bucket.put_object(key, bytes, content_type, ttl).await
    }
}
