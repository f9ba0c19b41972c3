use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Object metadata
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: u64,
    pub etag: Option<String>,
}

/// Storage abstraction for small durable objects (checkpoints, manifests)
#[async_trait]
pub trait Storage: Send + Sync {
    /// Put an object only if its current etag matches `expected`.
    /// `None` means the object must not exist yet.
    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> Result<ObjectMeta, StorageError>;

    /// Get an object
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Get object metadata
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError>;

    /// List objects with prefix
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;
}

/// Content hash used as the object etag
pub fn etag_for(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
