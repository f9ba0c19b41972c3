//! Wires configured table, checkpoint store and quarantine to one consumer
//! per subscription.

use std::sync::Arc;

use finstream_metadata::{CheckpointConfig, CheckpointType, PipelineConfig, QuarantineConfig, TableConfig, TableType};
use finstream_middleware::{MiddlewareFactory, Transport};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::checkpoint::{CheckpointManager, CheckpointStore, InMemoryCheckpointStore, StorageCheckpointStore};
use crate::consumer::{ConsumerSettings, ConsumerStats, IngestConsumer};
use crate::error::IngestError;
use crate::quarantine::{InMemoryQuarantine, JsonlQuarantine, QuarantineSink};
use crate::table::{InMemoryTable, ParquetTable, Table};
use crate::writer::TableWriter;

const CHECKPOINT_BUCKET: &str = "finstream";

pub fn create_table(config: &TableConfig) -> Result<Arc<dyn Table>, IngestError> {
    match config.table_type {
        TableType::Memory => Ok(Arc::new(InMemoryTable::new())),
        TableType::Parquet => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| IngestError::Config("table.path is required for parquet".to_string()))?;
            Ok(Arc::new(ParquetTable::new(path)))
        }
    }
}

pub fn create_checkpoint_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>, IngestError> {
    match config.checkpoint_type {
        CheckpointType::Memory => Ok(Arc::new(InMemoryCheckpointStore::new())),
        CheckpointType::Local => {
            let storage = MiddlewareFactory::create_storage(config)?;
            Ok(Arc::new(StorageCheckpointStore::new(storage, CHECKPOINT_BUCKET)))
        }
    }
}

pub fn create_quarantine(config: &QuarantineConfig) -> Arc<dyn QuarantineSink> {
    match &config.path {
        Some(dir) => Arc::new(JsonlQuarantine::new(dir)),
        None => Arc::new(InMemoryQuarantine::new()),
    }
}

/// Final outcome of one subscription
#[derive(Debug)]
pub struct SubscriptionOutcome {
    pub subscription_id: String,
    pub result: Result<ConsumerStats, IngestError>,
}

pub struct IngestPipeline {
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    writer: Arc<TableWriter>,
    checkpoints: Arc<CheckpointManager>,
    quarantine: Arc<dyn QuarantineSink>,
}

impl IngestPipeline {
    /// Build every sink from configuration
    pub async fn from_config(config: PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self, IngestError> {
        let table = create_table(&config.table)?;
        let store = create_checkpoint_store(&config.checkpoint)?;
        let quarantine = create_quarantine(&config.quarantine);
        Self::new(config, transport, table, store, quarantine).await
    }

    pub async fn new(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        table: Arc<dyn Table>,
        store: Arc<dyn CheckpointStore>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Result<Self, IngestError> {
        let writer = TableWriter::open(table, config.table.table_id.clone()).await?;
        Ok(Self {
            config,
            transport,
            writer: Arc::new(writer),
            checkpoints: Arc::new(CheckpointManager::new(store)),
            quarantine,
        })
    }

    pub fn writer(&self) -> &Arc<TableWriter> {
        &self.writer
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// One consumer per configured subscription, sharing the table and checkpoint store
    pub fn consumers(&self) -> Vec<IngestConsumer> {
        self.config
            .consumer
            .subscriptions
            .iter()
            .map(|spec| {
                IngestConsumer::new(
                    ConsumerSettings::from_config(&self.config, spec),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.writer),
                    Arc::clone(&self.checkpoints),
                    Arc::clone(&self.quarantine),
                )
            })
            .collect()
    }

    /// Run every subscription until its stream ends or `shutdown` fires.
    /// A halted subscription does not stop the others.
    pub async fn run(&self, shutdown: CancellationToken) -> Vec<SubscriptionOutcome> {
        let mut tasks = JoinSet::new();
        for consumer in self.consumers() {
            let id = consumer.subscription_id().to_string();
            let shutdown = shutdown.clone();
            info!(subscription = %id, "Spawning consumer");
            tasks.spawn(async move {
                let result = consumer.run(shutdown).await;
                SubscriptionOutcome {
                    subscription_id: id,
                    result,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Consumer task panicked");
                    outcomes.push(SubscriptionOutcome {
                        subscription_id: String::new(),
                        result: Err(IngestError::from(e)),
                    });
                }
            }
        }
        outcomes.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parquet_table_requires_path() {
        let config = TableConfig {
            table_type: TableType::Parquet,
            path: None,
            table_id: "analysis".to_string(),
        };
        assert!(matches!(create_table(&config), Err(IngestError::Config(_))));
    }

    #[tokio::test]
    async fn test_local_checkpoint_store() {
        let dir = TempDir::new().unwrap();
        let config = CheckpointConfig {
            checkpoint_type: CheckpointType::Local,
            path: Some(dir.path().to_path_buf()),
        };
        let store = create_checkpoint_store(&config).unwrap();
        assert!(store.get("sub").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_consumer_per_subscription() {
        let mut config = PipelineConfig::dev();
        config.consumer.subscriptions.push(finstream_metadata::SubscriptionSpec {
            id: "second".to_string(),
            partition: Some("job-1".to_string()),
        });
        let transport = MiddlewareFactory::create_transport(&config.bus).await.unwrap();
        let pipeline = IngestPipeline::from_config(config, transport).await.unwrap();

        let ids: Vec<String> = pipeline
            .consumers()
            .iter()
            .map(|c| c.subscription_id().to_string())
            .collect();
        assert_eq!(ids, vec!["financial-analysis-ingest".to_string(), "second".to_string()]);
    }
}
