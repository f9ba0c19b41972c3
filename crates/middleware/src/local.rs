//! File-backed object storage rooted at a local directory.
//!
//! Buckets are subdirectories, keys are relative paths. Writes go to a temp
//! file that is synced to disk before being renamed into place, so readers
//! never see a torn object and a crash never leaves an empty one.
//! Conditional puts are serialized within the process.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::storage::{etag_for, ObjectMeta, Storage};

pub struct LocalStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if key.split('/').any(|part| part == "..") || bucket.contains("..") {
            return Err(StorageError::WriteFailed(format!("invalid key: {}/{}", bucket, key)));
        }
        Ok(self.root.join(bucket).join(key))
    }

    async fn read_meta(path: &Path, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, StorageError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let modified = tokio::fs::metadata(path)
            .await?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let meta = ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: modified,
            etag: Some(etag_for(&data)),
        };
        Ok(Some((data, meta)))
    }

    async fn write_atomic(path: &Path, key: &str, data: &Bytes) -> Result<ObjectMeta, StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: crate::transport::now_millis(),
            etag: Some(etag_for(data)),
        })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> Result<ObjectMeta, StorageError> {
        let path = self.object_path(bucket, key)?;
        let _guard = self.write_lock.lock().await;
        let actual = Self::read_meta(&path, key).await?.and_then(|(_, meta)| meta.etag);
        if actual.as_deref() != expected {
            return Err(StorageError::Conflict {
                key: format!("{}/{}", bucket, key),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        Self::write_atomic(&path, key, &data).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(bucket, key)?;
        Self::read_meta(&path, key)
            .await?
            .map(|(data, _)| data)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        let path = self.object_path(bucket, key)?;
        Self::read_meta(&path, key)
            .await?
            .map(|(_, meta)| meta)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let bucket_root = self.root.join(bucket);
        let mut objects = Vec::new();
        let mut pending = vec![bucket_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if !key.starts_with(prefix) || key.ends_with(".tmp") {
                    continue;
                }
                if let Some((_, meta)) = Self::read_meta(&path, &key).await? {
                    objects.push(meta);
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let data = Bytes::from(r#"{"watermark":5}"#);
        storage
            .put_if_match("finstream", "checkpoints/a.json", data.clone(), None)
            .await
            .unwrap();
        assert_eq!(storage.get("finstream", "checkpoints/a.json").await.unwrap(), data);
        assert!(dir.path().join("finstream/checkpoints/a.json").exists());
        assert!(!dir.path().join("finstream/checkpoints/a.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_is_durable_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b/checkpoints/a.json");
        let data = Bytes::from(r#"{"watermark":9}"#);

        let meta = LocalStorage::write_atomic(&path, "checkpoints/a.json", &data).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data.to_vec());
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(meta.etag, Some(etag_for(&data)));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.get("finstream", "missing.json").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.head("finstream", "missing.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_if_match() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let created = storage
            .put_if_match("b", "k.json", Bytes::from("1"), None)
            .await
            .unwrap();
        assert!(matches!(
            storage.put_if_match("b", "k.json", Bytes::from("2"), None).await,
            Err(StorageError::Conflict { .. })
        ));
        storage
            .put_if_match("b", "k.json", Bytes::from("2"), created.etag.as_deref())
            .await
            .unwrap();
        let head = storage.head("b", "k.json").await.unwrap();
        assert_eq!(head.etag, Some(etag_for(b"2")));
    }

    #[tokio::test]
    async fn test_list_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = LocalStorage::new(dir.path());
            for key in ["checkpoints/x.json", "checkpoints/y.json"] {
                storage.put_if_match("b", key, Bytes::from("x"), None).await.unwrap();
            }
        }
        let reopened = LocalStorage::new(dir.path());
        let keys: Vec<_> = reopened
            .list("b", "checkpoints/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["checkpoints/x.json", "checkpoints/y.json"]);
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage
            .put_if_match("b", "../escape", Bytes::from("x"), None)
            .await
            .is_err());
    }
}
