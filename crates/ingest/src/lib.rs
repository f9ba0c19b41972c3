//! finstream-ingest: micro-batch consumer for financial analysis messages
//!
//! Each subscription reads the bus, validates and batches messages, merges
//! them into a versioned table and then advances its checkpoint. Commits are
//! keyed on `(jobidentifier, analysisidentifier, item_index)`, so redelivered
//! messages never produce duplicate rows.

pub mod batch;
pub mod checkpoint;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod quarantine;
pub mod table;
pub mod writer;

pub use batch::{Batch, BatchAccumulator, ReceivedMessage};
pub use checkpoint::{
    Checkpoint, CheckpointManager, CheckpointStore, Committed, InMemoryCheckpointStore,
    StorageCheckpointStore,
};
pub use consumer::{
    ConsumerSettings, ConsumerState, ConsumerStats, FlushHandle, FlushTrigger, IngestConsumer,
};
pub use error::IngestError;
pub use metrics::IngestMetrics;
pub use pipeline::{create_checkpoint_store, create_quarantine, create_table, IngestPipeline, SubscriptionOutcome};
pub use quarantine::{InMemoryQuarantine, JsonlQuarantine, QuarantineRecord, QuarantineSink};
pub use table::{
    ColumnDef, ColumnType, CommitId, InMemoryTable, MergeKey, MergeOutcome, ParquetTable, Table,
    TableRow, TableSchema, MERGE_KEY,
};
pub use writer::{flatten, CommitResult, TableWriter};
