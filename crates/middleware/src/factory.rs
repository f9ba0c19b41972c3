use std::sync::Arc;

use finstream_metadata::{BusConfig, CheckpointConfig, CheckpointType, TransportType};
use tracing::info;

use crate::error::TransportError;
use crate::local::LocalStorage;
use crate::memory::{InMemoryStorage, InMemoryTransport};
use crate::nats::NatsTransport;
use crate::storage::Storage;
use crate::transport::Transport;

/// Error creating middleware
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Factory for creating middleware instances based on pipeline config
pub struct MiddlewareFactory;

impl MiddlewareFactory {
    /// Create a transport based on bus configuration
    pub async fn create_transport(bus: &BusConfig) -> Result<Arc<dyn Transport>, FactoryError> {
        match bus.transport_type {
            TransportType::Memory => Ok(Arc::new(InMemoryTransport::new())),
            TransportType::Nats => {
                let url = bus
                    .url
                    .as_deref()
                    .ok_or_else(|| FactoryError::ConfigError("bus.url is required for nats".to_string()))?;
                let transport = NatsTransport::connect(url, &bus.auth, bus.stream_name()).await?;
                transport.ensure_stream(&bus.topic).await?;
                info!(stream = %transport.stream_name(), topic = %bus.topic, "JetStream stream ready");
                Ok(Arc::new(transport))
            }
        }
    }

    /// Create the object storage backing checkpoints
    pub fn create_storage(checkpoint: &CheckpointConfig) -> Result<Arc<dyn Storage>, FactoryError> {
        match checkpoint.checkpoint_type {
            CheckpointType::Memory => Ok(Arc::new(InMemoryStorage::new())),
            CheckpointType::Local => {
                let path = checkpoint.path.as_ref().ok_or_else(|| {
                    FactoryError::ConfigError("checkpoint.path is required for local checkpoints".to_string())
                })?;
                Ok(Arc::new(LocalStorage::new(path)))
            }
        }
    }
}
