use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{BucketError, BucketStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub ttl: Option<String>,
}

/// Process-local bucket, used for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        ttl: Option<&str>,
    ) -> Result<(), BucketError> {
        let object = StoredObject {
            bytes,
            content_type: content_type.to_string(),
            ttl: ttl.filter(|value| !value.is_empty()).map(str::to_string),
        };
        self.objects.write().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, BucketError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|object| object.bytes.clone())
            .ok_or_else(|| BucketError::NotFound(key.to_string()))
    }
}
