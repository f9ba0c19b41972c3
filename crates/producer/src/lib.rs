//! finstream-producer: build, publish and track financial analysis messages.

pub mod batching;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod producer;
pub mod sample;

pub use batching::BatchingProducer;
pub use delivery::{DeliveryRecord, DeliveryState, DeliveryTracker, InFlight};
pub use error::ProducerError;
pub use partition::PartitionKey;
pub use producer::Producer;
pub use sample::SampleGenerator;
