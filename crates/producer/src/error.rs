use finstream_middleware::{CodecError, TransportError};
use finstream_model::SchemaViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    #[error("delivery failed for job {job_id} analysis {analysis_id} after {attempts} attempts: {source}")]
    DeliveryFailure {
        job_id: String,
        analysis_id: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("producer is closed")]
    Closed,
}
