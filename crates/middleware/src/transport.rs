use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Monotonically increasing marker of subscription progress (bus sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Watermark(pub u64);

impl Watermark {
    pub const ZERO: Watermark = Watermark(0);

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Watermark {
        Watermark(self.0 + 1)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifying one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryToken(pub u64);

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message envelope with metadata
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub topic: String,
    /// Partition key the message was published under
    pub key: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    pub watermark: Watermark,
    /// Broker receive time, milliseconds since epoch
    pub timestamp: u64,
}

/// Completion of a publish. Resolves once the bus acknowledges (or rejects) it.
#[derive(Debug)]
pub struct PendingAck {
    token: DeliveryToken,
    rx: oneshot::Receiver<Result<Watermark, TransportError>>,
}

impl PendingAck {
    pub fn new(token: DeliveryToken, rx: oneshot::Receiver<Result<Watermark, TransportError>>) -> Self {
        Self { token, rx }
    }

    /// A completion that is already resolved
    pub fn ready(token: DeliveryToken, result: Result<Watermark, TransportError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { token, rx }
    }

    pub fn token(&self) -> DeliveryToken {
        self.token
    }

    /// Wait for the bus acknowledgment
    pub async fn wait(self) -> Result<Watermark, TransportError> {
        self.rx
            .await
            .map_err(|_| TransportError::Closed(format!("completion for token {} dropped", self.token)))?
    }
}

/// Where and how to subscribe
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub topic: String,
    /// Durable subscription name
    pub subscription_id: String,
    /// Only deliver messages published under this partition key
    pub partition: Option<String>,
    /// Resume after this watermark; `None` starts from the beginning
    pub from: Option<Watermark>,
}

/// Subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send {
    /// Receive next message (waits until available). `None` means the stream is
    /// closed. Cancel-safe: a message is never lost if the future is dropped.
    async fn next(&mut self) -> Result<Option<TransportMessage>, TransportError>;

    /// Acknowledge every delivered message up to and including `watermark`
    async fn ack(&mut self, watermark: Watermark) -> Result<(), TransportError>;

    /// Unsubscribe and close
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Transport abstraction for pub/sub messaging
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a message to the bus. Connection-level failures return immediately;
    /// the broker acknowledgment arrives through the returned completion.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<PendingAck, TransportError>;

    /// Open a subscription
    async fn subscribe(&self, request: SubscribeRequest) -> Result<Box<dyn Subscription>, TransportError>;
}

/// Milliseconds since epoch
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_ordering() {
        assert!(Watermark(3) > Watermark(2));
        assert_eq!(Watermark(7).next(), Watermark(8));
        assert_eq!(Watermark::default(), Watermark::ZERO);
        assert_eq!(Watermark(42).to_string(), "42");
    }

    #[tokio::test]
    async fn test_ready_pending_ack() {
        let ack = PendingAck::ready(DeliveryToken(1), Ok(Watermark(5)));
        assert_eq!(ack.token(), DeliveryToken(1));
        assert_eq!(ack.wait().await.unwrap(), Watermark(5));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_closed() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let ack = PendingAck::new(DeliveryToken(9), rx);
        assert!(matches!(ack.wait().await, Err(TransportError::Closed(_))));
    }
}
