use finstream_middleware::{CodecError, FactoryError, StorageError, TransportError, Watermark};
use finstream_model::SchemaViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Commit failed: {0}")]
    CommitFailure(String),

    #[error("Checkpoint for {subscription} changed underneath us: expected {expected:?}, found {actual:?}")]
    CheckpointConflict {
        subscription: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Watermark regression for {subscription}: committed {committed}, attempted {attempted}")]
    WatermarkRegression {
        subscription: String,
        committed: Watermark,
        attempted: Watermark,
    },

    #[error("Ingestion halted for {subscription} (last committed {last_committed:?}): {source}")]
    IngestionFailure {
        subscription: String,
        last_committed: Option<Watermark>,
        #[source]
        source: Box<IngestError>,
    },

    #[error("Schema evolution rejected: {0}")]
    SchemaEvolution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Middleware error: {0}")]
    Factory(#[from] FactoryError),

    #[error("Consumer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl IngestError {
    /// Failures that a later attempt of the same commit may not hit
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::SchemaEvolution(_)
                | IngestError::WatermarkRegression { .. }
                | IngestError::Config(_)
                | IngestError::Factory(_)
                | IngestError::Task(_)
                | IngestError::IngestionFailure { .. }
        )
    }
}
