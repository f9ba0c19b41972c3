use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{
    now_millis, DeliveryToken, PendingAck, SubscribeRequest, Subscription, Transport,
    TransportMessage, Watermark,
};

#[derive(Default)]
struct TopicLog {
    /// Message with watermark `n` lives at index `n - 1`
    messages: Vec<TransportMessage>,
    closed: bool,
}

#[derive(Default)]
struct Topic {
    log: Mutex<TopicLog>,
    notify: Notify,
    /// Durable ack floor per subscription id
    acked: DashMap<String, Watermark>,
}

/// In-process bus with per-topic retained logs, cumulative acks and optional
/// redelivery of unacked messages.
pub struct InMemoryTransport {
    topics: DashMap<String, Arc<Topic>>,
    tokens: AtomicU64,
    fail_publishes: AtomicU32,
    redelivery_rounds: u32,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            tokens: AtomicU64::new(1),
            fail_publishes: AtomicU32::new(0),
            redelivery_rounds: 0,
        }
    }

    /// Each subscription rewinds to its ack floor up to `rounds` times when it
    /// reaches the end of the log with unacked messages outstanding.
    pub fn with_redelivery(mut self, rounds: u32) -> Self {
        self.redelivery_rounds = rounds;
        self
    }

    /// Reject the next `count` publishes with a negative acknowledgment
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_publishes.store(count, Ordering::SeqCst);
    }

    /// Close a topic: subscribers drain the log and then see end of stream
    pub async fn close_topic(&self, topic: &str) {
        let state = self.topic(topic);
        state.log.lock().await.closed = true;
        state.notify.notify_waiters();
    }

    /// Number of messages retained for a topic
    pub async fn len(&self, topic: &str) -> usize {
        self.topic(topic).log.lock().await.messages.len()
    }

    pub async fn is_empty(&self, topic: &str) -> bool {
        self.len(topic).await == 0
    }

    /// Ack floor recorded for a subscription
    pub fn acked(&self, topic: &str, subscription_id: &str) -> Option<Watermark> {
        self.topics
            .get(topic)
            .and_then(|t| t.acked.get(subscription_id).map(|w| *w))
    }

    fn topic(&self, topic: &str) -> Arc<Topic> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Topic::default()))
            .clone()
    }

    fn next_token(&self) -> DeliveryToken {
        DeliveryToken(self.tokens.fetch_add(1, Ordering::Relaxed))
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    topic: Arc<Topic>,
    subscription_id: String,
    partition: Option<String>,
    /// Watermark of the next message to examine
    cursor: u64,
    /// Highest watermark handed out so far
    delivered: Watermark,
    redelivery_rounds: u32,
}

impl InMemorySubscription {
    fn ack_floor(&self) -> Watermark {
        self.topic
            .acked
            .get(&self.subscription_id)
            .map(|w| *w)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        loop {
            let notified = self.topic.notify.notified();
            {
                let log = self.topic.log.lock().await;
                while (self.cursor as usize) <= log.messages.len() {
                    let msg = &log.messages[self.cursor as usize - 1];
                    self.cursor += 1;
                    let wanted = self.partition.as_deref().is_none_or(|p| p == msg.key);
                    if wanted {
                        if msg.watermark > self.delivered {
                            self.delivered = msg.watermark;
                        }
                        return Ok(Some(msg.clone()));
                    }
                }

                let floor = self.ack_floor();
                if self.redelivery_rounds > 0 && floor < self.delivered {
                    self.redelivery_rounds -= 1;
                    debug!(
                        subscription = %self.subscription_id,
                        from = floor.value() + 1,
                        "Redelivering unacked messages"
                    );
                    self.cursor = floor.value() + 1;
                    continue;
                }

                if log.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, watermark: Watermark) -> Result<(), TransportError> {
        if watermark > self.delivered {
            return Err(TransportError::AckFailed(format!(
                "watermark {} was never delivered (highest {})",
                watermark, self.delivered
            )));
        }
        let mut entry = self
            .topic
            .acked
            .entry(self.subscription_id.clone())
            .or_insert(Watermark::ZERO);
        if watermark > *entry {
            *entry = watermark;
        }
        Ok(())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<PendingAck, TransportError> {
        let token = self.next_token();
        if self.take_injected_failure() {
            return Ok(PendingAck::ready(
                token,
                Err(TransportError::PublishFailed("negative acknowledgment".to_string())),
            ));
        }

        let state = self.topic(topic);
        let watermark = {
            let mut log = state.log.lock().await;
            if log.closed {
                return Err(TransportError::Closed(format!("topic {} is closed", topic)));
            }
            let watermark = Watermark(log.messages.len() as u64 + 1);
            log.messages.push(TransportMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
                headers,
                watermark,
                timestamp: now_millis(),
            });
            watermark
        };
        state.notify.notify_waiters();
        Ok(PendingAck::ready(token, Ok(watermark)))
    }

    async fn subscribe(&self, request: SubscribeRequest) -> Result<Box<dyn Subscription>, TransportError> {
        let state = self.topic(&request.topic);
        let durable = state
            .acked
            .get(&request.subscription_id)
            .map(|w| *w)
            .unwrap_or_default();
        let start = request.from.unwrap_or_default().max(durable);
        Ok(Box::new(InMemorySubscription {
            topic: state,
            subscription_id: request.subscription_id,
            partition: request.partition,
            cursor: start.value() + 1,
            delivered: start,
            redelivery_rounds: self.redelivery_rounds,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> SubscribeRequest {
        SubscribeRequest {
            topic: "analysis".to_string(),
            subscription_id: id.to_string(),
            partition: None,
            from: None,
        }
    }

    async fn publish(transport: &InMemoryTransport, key: &str, body: &str) -> Watermark {
        transport
            .publish("analysis", key, Bytes::from(body.to_string()), HashMap::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe(request("a")).await.unwrap();
        publish(&transport, "job-1", "hello").await;
        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.topic, "analysis");
        assert_eq!(msg.key, "job-1");
        assert_eq!(msg.payload, Bytes::from("hello"));
        assert_eq!(msg.watermark, Watermark(1));
    }

    #[tokio::test]
    async fn test_watermarks_increment() {
        let transport = InMemoryTransport::new();
        assert_eq!(publish(&transport, "k", "1").await, Watermark(1));
        assert_eq!(publish(&transport, "k", "2").await, Watermark(2));
        assert_eq!(transport.len("analysis").await, 2);
    }

    #[tokio::test]
    async fn test_subscribe_from_watermark() {
        let transport = InMemoryTransport::new();
        for i in 0..3 {
            publish(&transport, "k", &i.to_string()).await;
        }
        let mut req = request("a");
        req.from = Some(Watermark(2));
        let mut sub = transport.subscribe(req).await.unwrap();
        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.watermark, Watermark(3));
    }

    #[tokio::test]
    async fn test_partition_filter() {
        let transport = InMemoryTransport::new();
        publish(&transport, "bond-1", "a").await;
        publish(&transport, "bond-2", "b").await;
        publish(&transport, "bond-1", "c").await;
        transport.close_topic("analysis").await;

        let mut req = request("a");
        req.partition = Some("bond-1".to_string());
        let mut sub = transport.subscribe(req).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(first.watermark, Watermark(1));
        assert_eq!(second.watermark, Watermark(3));
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_topic_ends_stream() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe(request("a")).await.unwrap();
        transport.close_topic("analysis").await;
        assert!(sub.next().await.unwrap().is_none());
        let result = transport
            .publish("analysis", "k", Bytes::from("late"), HashMap::new())
            .await;
        assert!(matches!(result, Err(TransportError::Closed(_))));
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let transport = InMemoryTransport::new();
        transport.fail_next_publishes(1);
        let failed = transport
            .publish("analysis", "k", Bytes::from("x"), HashMap::new())
            .await
            .unwrap();
        assert!(matches!(failed.wait().await, Err(TransportError::PublishFailed(_))));
        assert_eq!(publish(&transport, "k", "y").await, Watermark(1));
    }

    #[tokio::test]
    async fn test_cumulative_ack_resumes_durable() {
        let transport = InMemoryTransport::new();
        for i in 0..4 {
            publish(&transport, "k", &i.to_string()).await;
        }
        let mut sub = transport.subscribe(request("durable")).await.unwrap();
        sub.next().await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        sub.ack(second.watermark).await.unwrap();
        assert_eq!(transport.acked("analysis", "durable"), Some(Watermark(2)));

        let mut resumed = transport.subscribe(request("durable")).await.unwrap();
        let msg = resumed.next().await.unwrap().unwrap();
        assert_eq!(msg.watermark, Watermark(3));
    }

    #[tokio::test]
    async fn test_ack_beyond_delivered_fails() {
        let transport = InMemoryTransport::new();
        publish(&transport, "k", "x").await;
        let mut sub = transport.subscribe(request("a")).await.unwrap();
        assert!(matches!(
            sub.ack(Watermark(1)).await,
            Err(TransportError::AckFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_redelivers_unacked_messages() {
        let transport = InMemoryTransport::new().with_redelivery(1);
        publish(&transport, "k", "1").await;
        publish(&transport, "k", "2").await;
        transport.close_topic("analysis").await;

        let mut sub = transport.subscribe(request("a")).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        sub.ack(first.watermark).await.unwrap();
        sub.next().await.unwrap().unwrap();

        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.watermark, Watermark(2));
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut sub = transport.subscribe(request("a")).await.unwrap();
        let publisher = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher
                .publish("analysis", "k", Bytes::from("later"), HashMap::new())
                .await
                .unwrap();
        });
        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.payload, Bytes::from("later"));
    }
}
