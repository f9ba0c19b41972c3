//! Durable per-subscription progress.
//!
//! Commit order is write-ahead: the idempotent table commit runs first, then
//! the checkpoint is compare-and-set against the value loaded at startup (or
//! written by the previous commit). A crash between the two replays the batch,
//! which the table turns into a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use finstream_middleware::{Storage, StorageError, Watermark};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub subscription_id: String,
    pub last_committed_watermark: u64,
    pub schema_location_version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(subscription_id: impl Into<String>, watermark: Watermark, schema_version: u64) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            last_committed_watermark: watermark.value(),
            schema_location_version: schema_version,
            updated_at: Utc::now(),
        }
    }

    pub fn watermark(&self) -> Watermark {
        Watermark(self.last_committed_watermark)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, subscription_id: &str) -> Result<Option<Checkpoint>, IngestError>;

    /// Write `checkpoint` only if the stored watermark equals `expected`
    /// (`None`: no checkpoint stored yet).
    async fn compare_and_put(
        &self,
        subscription_id: &str,
        expected: Option<Watermark>,
        checkpoint: &Checkpoint,
    ) -> Result<(), IngestError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, subscription_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self.checkpoints.lock().await.get(subscription_id).cloned())
    }

    async fn compare_and_put(
        &self,
        subscription_id: &str,
        expected: Option<Watermark>,
        checkpoint: &Checkpoint,
    ) -> Result<(), IngestError> {
        let mut checkpoints = self.checkpoints.lock().await;
        let actual = checkpoints.get(subscription_id).map(Checkpoint::watermark);
        if actual != expected {
            return Err(IngestError::CheckpointConflict {
                subscription: subscription_id.to_string(),
                expected: expected.map(Watermark::value),
                actual: actual.map(Watermark::value),
            });
        }
        checkpoints.insert(subscription_id.to_string(), checkpoint.clone());
        Ok(())
    }
}

/// Checkpoints as JSON objects in a [`Storage`] bucket, compare-and-set on the etag
pub struct StorageCheckpointStore {
    storage: Arc<dyn Storage>,
    bucket: String,
}

impl StorageCheckpointStore {
    pub fn new(storage: Arc<dyn Storage>, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    fn key(subscription_id: &str) -> String {
        format!("checkpoints/{}.json", subscription_id)
    }

    /// Stored checkpoint and the etag it was read under
    async fn read(&self, subscription_id: &str) -> Result<Option<(Checkpoint, Option<String>)>, IngestError> {
        let key = Self::key(subscription_id);
        let meta = match self.storage.head(&self.bucket, &key).await {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = self.storage.get(&self.bucket, &key).await?;
        let checkpoint: Checkpoint = serde_json::from_slice(&data)?;
        Ok(Some((checkpoint, meta.etag)))
    }

    /// All stored checkpoints, ordered by subscription
    pub async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let mut checkpoints = Vec::new();
        for meta in self.storage.list(&self.bucket, "checkpoints/").await? {
            let data = self.storage.get(&self.bucket, &meta.key).await?;
            checkpoints.push(serde_json::from_slice::<Checkpoint>(&data)?);
        }
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointStore for StorageCheckpointStore {
    async fn get(&self, subscription_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self.read(subscription_id).await?.map(|(checkpoint, _)| checkpoint))
    }

    async fn compare_and_put(
        &self,
        subscription_id: &str,
        expected: Option<Watermark>,
        checkpoint: &Checkpoint,
    ) -> Result<(), IngestError> {
        let current = self.read(subscription_id).await?;
        let actual = current.as_ref().map(|(c, _)| c.watermark());
        if actual != expected {
            return Err(IngestError::CheckpointConflict {
                subscription: subscription_id.to_string(),
                expected: expected.map(Watermark::value),
                actual: actual.map(Watermark::value),
            });
        }

        let etag = current.and_then(|(_, etag)| etag);
        let data = Bytes::from(serde_json::to_vec_pretty(checkpoint)?);
        match self
            .storage
            .put_if_match(&self.bucket, &Self::key(subscription_id), data, etag.as_deref())
            .await
        {
            Ok(_) => Ok(()),
            Err(StorageError::Conflict { .. }) => Err(IngestError::CheckpointConflict {
                subscription: subscription_id.to_string(),
                expected: expected.map(Watermark::value),
                actual: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Outcome of one atomic commit
#[derive(Debug)]
pub struct Committed<T> {
    pub output: T,
    pub checkpoint: Checkpoint,
}

/// Loads checkpoints at startup and sequences every commit after them
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    /// Last checkpointed watermark per subscription, the CAS expectation
    known: DashMap<String, Option<Watermark>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            known: DashMap::new(),
        }
    }

    /// Read the checkpoint for a subscription. `None` means start from the beginning.
    pub async fn load(&self, subscription_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        let checkpoint = self.store.get(subscription_id).await?;
        self.known
            .insert(subscription_id.to_string(), checkpoint.as_ref().map(Checkpoint::watermark));
        match &checkpoint {
            Some(c) => info!(
                subscription = %subscription_id,
                watermark = c.last_committed_watermark,
                schema_version = c.schema_location_version,
                "Loaded checkpoint"
            ),
            None => info!(subscription = %subscription_id, "No checkpoint, starting from the beginning"),
        }
        Ok(checkpoint)
    }

    /// Last checkpointed watermark known to this manager
    pub fn committed(&self, subscription_id: &str) -> Option<Watermark> {
        self.known.get(subscription_id).and_then(|w| *w)
    }

    /// Run `table_commit`, then advance the checkpoint to `watermark`.
    ///
    /// Fails without touching the table if `watermark` would not move the
    /// checkpoint forward.
    pub async fn commit_atomically<F, Fut, T>(
        &self,
        subscription_id: &str,
        watermark: Watermark,
        schema_version: u64,
        table_commit: F,
    ) -> Result<Committed<T>, IngestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let known = self.known.get(subscription_id).map(|w| *w);
        let expected = match known {
            Some(known) => known,
            None => self.load(subscription_id).await?.map(|c| c.watermark()),
        };
        if let Some(committed) = expected {
            if watermark <= committed {
                return Err(IngestError::WatermarkRegression {
                    subscription: subscription_id.to_string(),
                    committed,
                    attempted: watermark,
                });
            }
        }

        let output = table_commit().await?;

        let checkpoint = Checkpoint::new(subscription_id, watermark, schema_version);
        self.store
            .compare_and_put(subscription_id, expected, &checkpoint)
            .await?;
        self.known.insert(subscription_id.to_string(), Some(watermark));
        debug!(
            subscription = %subscription_id,
            watermark = watermark.value(),
            "Checkpoint advanced"
        );

        Ok(Committed { output, checkpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finstream_middleware::{InMemoryStorage, LocalStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_compare_and_put() {
        let store = InMemoryCheckpointStore::new();
        let first = Checkpoint::new("sub", Watermark(5), 1);
        store.compare_and_put("sub", None, &first).await.unwrap();

        let stale = store.compare_and_put("sub", None, &Checkpoint::new("sub", Watermark(9), 1)).await;
        assert!(matches!(stale, Err(IngestError::CheckpointConflict { actual: Some(5), .. })));

        store
            .compare_and_put("sub", Some(Watermark(5)), &Checkpoint::new("sub", Watermark(9), 1))
            .await
            .unwrap();
        assert_eq!(store.get("sub").await.unwrap().unwrap().watermark(), Watermark(9));
    }

    #[tokio::test]
    async fn test_storage_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));

        let store = StorageCheckpointStore::new(Arc::clone(&storage), "state");
        assert!(store.get("sub-a").await.unwrap().is_none());
        store
            .compare_and_put("sub-a", None, &Checkpoint::new("sub-a", Watermark(12), 1))
            .await
            .unwrap();

        let reopened = StorageCheckpointStore::new(storage, "state");
        let checkpoint = reopened.get("sub-a").await.unwrap().unwrap();
        assert_eq!(checkpoint.watermark(), Watermark(12));
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_store_rejects_stale_expectation() {
        let store = StorageCheckpointStore::new(Arc::new(InMemoryStorage::new()), "state");
        store
            .compare_and_put("sub", None, &Checkpoint::new("sub", Watermark(3), 1))
            .await
            .unwrap();
        let result = store
            .compare_and_put("sub", Some(Watermark(2)), &Checkpoint::new("sub", Watermark(4), 1))
            .await;
        assert!(matches!(result, Err(IngestError::CheckpointConflict { .. })));
    }

    #[tokio::test]
    async fn test_commit_runs_table_first_then_checkpoint() {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        assert!(manager.load("sub").await.unwrap().is_none());

        let committed = manager
            .commit_atomically("sub", Watermark(7), 1, || async { Ok::<_, IngestError>("commit-1") })
            .await
            .unwrap();
        assert_eq!(committed.output, "commit-1");
        assert_eq!(committed.checkpoint.watermark(), Watermark(7));
        assert_eq!(manager.committed("sub"), Some(Watermark(7)));
    }

    #[tokio::test]
    async fn test_failed_table_commit_leaves_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let manager = CheckpointManager::new(store.clone());
        manager.load("sub").await.unwrap();

        let result = manager
            .commit_atomically("sub", Watermark(3), 1, || async {
                Err::<(), _>(IngestError::CommitFailure("disk full".into()))
            })
            .await;
        assert!(matches!(result, Err(IngestError::CommitFailure(_))));
        assert!(store.get("sub").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_regression_is_rejected_before_table_commit() {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        manager
            .commit_atomically("sub", Watermark(10), 1, || async { Ok::<_, IngestError>(()) })
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let result = manager
            .commit_atomically("sub", Watermark(10), 1, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, IngestError>(())
            })
            .await;
        assert!(matches!(result, Err(IngestError::WatermarkRegression { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
