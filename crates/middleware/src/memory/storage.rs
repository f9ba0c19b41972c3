use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::storage::{etag_for, ObjectMeta, Storage};
use crate::transport::now_millis;

type BucketData = HashMap<String, (Bytes, ObjectMeta)>;
type StorageData = HashMap<String, BucketData>;

pub struct InMemoryStorage {
    data: Arc<RwLock<StorageData>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { data: Arc::new(RwLock::new(HashMap::new())) }
    }

    fn meta(key: &str, data: &Bytes) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: now_millis(),
            etag: Some(etag_for(data)),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> Result<ObjectMeta, StorageError> {
        let mut store = self.data.write().await;
        let bucket_data = store.entry(bucket.to_string()).or_default();
        let actual = bucket_data.get(key).and_then(|(_, meta)| meta.etag.clone());
        if actual.as_deref() != expected {
            return Err(StorageError::Conflict {
                key: format!("{}/{}", bucket, key),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        let meta = Self::meta(key, &data);
        bucket_data.insert(key.to_string(), (data, meta.clone()));
        Ok(meta)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.data.read().await;
        store.get(bucket).and_then(|b| b.get(key)).map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        let store = self.data.read().await;
        store.get(bucket).and_then(|b| b.get(key)).map(|(_, meta)| meta.clone())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let store = self.data.read().await;
        let mut objects: Vec<ObjectMeta> = store
            .get(bucket)
            .map(|b| b.iter().filter(|(k, _)| k.starts_with(prefix)).map(|(_, (_, meta))| meta.clone()).collect())
            .unwrap_or_default();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let storage = InMemoryStorage::new();
        let data = Bytes::from("hello world");
        storage.put_if_match("bucket", "file.txt", data.clone(), None).await.unwrap();
        let retrieved = storage.get("bucket", "file.txt").await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_not_found() {
        let storage = InMemoryStorage::new();
        let result = storage.get("bucket", "missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_if_match_create_only() {
        let storage = InMemoryStorage::new();
        let first = storage.put_if_match("b", "k", Bytes::from("v1"), None).await.unwrap();
        let again = storage.put_if_match("b", "k", Bytes::from("v2"), None).await;
        assert!(matches!(again, Err(StorageError::Conflict { .. })));

        let etag = first.etag.unwrap();
        storage.put_if_match("b", "k", Bytes::from("v2"), Some(&etag)).await.unwrap();
        assert_eq!(storage.get("b", "k").await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn test_put_if_match_stale_etag() {
        let storage = InMemoryStorage::new();
        let first = storage.put_if_match("b", "k", Bytes::from("v1"), None).await.unwrap();
        storage
            .put_if_match("b", "k", Bytes::from("v2"), first.etag.as_deref())
            .await
            .unwrap();
        let stale = storage
            .put_if_match("b", "k", Bytes::from("v3"), first.etag.as_deref())
            .await;
        assert!(matches!(stale, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let storage = InMemoryStorage::new();
        storage.put_if_match("b", "checkpoints/b.json", Bytes::from("1"), None).await.unwrap();
        storage.put_if_match("b", "checkpoints/a.json", Bytes::from("2"), None).await.unwrap();
        storage.put_if_match("b", "other.json", Bytes::from("3"), None).await.unwrap();
        let listed = storage.list("b", "checkpoints/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["checkpoints/a.json", "checkpoints/b.json"]);
    }
}
