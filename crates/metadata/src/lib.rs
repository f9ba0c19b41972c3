//! finstream-metadata: pipeline configuration shared by producer and consumer
//!
//! A single `PipelineConfig` is loaded from YAML and passed explicitly to every
//! component at construction time.

pub mod error;
pub mod pipeline;

pub use error::MetadataError;
pub use pipeline::{
    AuthConfig, BusConfig, CheckpointConfig, CheckpointType, Compression, ConsumerConfig,
    InstrumentDefaults, KeyStrategy, PipelineConfig, ProducerConfig, QuarantineConfig,
    RetryConfig, RiskDefaults, SampleConfig, SubscriptionSpec, TableConfig, TableType,
    TransportType,
};
