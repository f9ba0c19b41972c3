//! finstream-middleware: Pluggable bus and storage abstractions
//!
//! Provides trait-based abstractions for Transport and Storage with in-memory
//! implementations for testing, a NATS JetStream transport, a local file
//! storage, payload codecs and the shared retry policy.

pub mod codec;
pub mod error;
pub mod factory;
pub mod local;
pub mod memory;
pub mod nats;
pub mod retry;
pub mod storage;
pub mod transport;

pub use codec::{content_encoding, decode_payload, encode_payload, CONTENT_ENCODING_HEADER};
pub use error::{CodecError, StorageError, TransportError};
pub use factory::{FactoryError, MiddlewareFactory};
pub use local::LocalStorage;
pub use memory::{InMemoryStorage, InMemoryTransport};
pub use nats::{sanitize_subject_token, subject_for, NatsTransport};
pub use retry::RetryPolicy;
pub use storage::{etag_for, ObjectMeta, Storage};
pub use transport::{
    DeliveryToken, PendingAck, SubscribeRequest, Subscription, Transport, TransportMessage,
    Watermark,
};
