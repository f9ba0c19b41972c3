use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use finstream_metadata::{KeyStrategy, ProducerConfig};
use finstream_middleware::codec::content_encoding;
use finstream_middleware::{encode_payload, RetryPolicy, Transport, TransportError, CONTENT_ENCODING_HEADER};
use finstream_model::{encode, AnalysisMessage, DataItem, SchemaViolation};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::delivery::{DeliveryRecord, DeliveryState, DeliveryTracker, InFlight};
use crate::error::ProducerError;
use crate::metrics::ProducerMetrics;
use crate::partition::PartitionKey;

pub const MESSAGE_TYPE: &str = "financial_analysis";

/// Publishes analysis messages to one topic with tracked, retried delivery.
pub struct Producer {
    transport: Arc<dyn Transport>,
    topic: String,
    config: ProducerConfig,
    retry: RetryPolicy,
    tracker: Arc<DeliveryTracker>,
    round_robin: AtomicUsize,
    metrics: ProducerMetrics,
}

impl Producer {
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>, config: ProducerConfig) -> Self {
        let topic = topic.into();
        let retry = RetryPolicy::from(&config.retry);
        Self {
            transport,
            metrics: ProducerMetrics::new(topic.clone()),
            topic,
            config,
            retry,
            tracker: Arc::new(DeliveryTracker::new()),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Build a validated message. Invalid messages never reach `publish`.
    pub fn build_message(
        job_id: &str,
        analysis_id: &str,
        items: Vec<DataItem>,
    ) -> Result<AnalysisMessage, SchemaViolation> {
        AnalysisMessage::new(job_id, analysis_id, items)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Partition key chosen by the configured strategy
    pub fn partition_key(&self, message: &AnalysisMessage) -> PartitionKey {
        match self.config.key_strategy {
            KeyStrategy::Job => PartitionKey::for_job(message),
            KeyStrategy::Instrument => PartitionKey::for_message_entity(message),
            KeyStrategy::RoundRobin => {
                let n = self.round_robin.fetch_add(1, Ordering::Relaxed);
                PartitionKey::round_robin(n, self.config.round_robin_partitions)
            }
        }
    }

    /// Serialize and compress once; the same bytes are reused across retries
    fn encode_payload(&self, message: &AnalysisMessage) -> Result<Bytes, ProducerError> {
        let json = encode(message)?;
        Ok(encode_payload(self.config.compression, &json)?)
    }

    fn headers(&self, message: &AnalysisMessage) -> HashMap<String, String> {
        HashMap::from([
            ("message_type".to_string(), MESSAGE_TYPE.to_string()),
            ("job_id".to_string(), message.job_identifier().to_string()),
            ("analysis_id".to_string(), message.analysis_identifier().to_string()),
            ("timestamp".to_string(), Utc::now().to_rfc3339()),
            (
                CONTENT_ENCODING_HEADER.to_string(),
                content_encoding(self.config.compression).to_string(),
            ),
        ])
    }

    async fn publish_encoded(
        &self,
        message: &AnalysisMessage,
        payload: Bytes,
        key: &PartitionKey,
        attempt: u32,
    ) -> Result<InFlight, TransportError> {
        let completion = self
            .transport
            .publish(&self.topic, key.as_str(), payload, self.headers(message))
            .await?;
        let record = DeliveryRecord {
            job_id: message.job_identifier().to_string(),
            analysis_id: message.analysis_identifier().to_string(),
            partition_key: key.clone(),
            token: completion.token(),
            sent_at: Utc::now(),
            attempt,
            state: DeliveryState::Pending,
            watermark: None,
        };
        let in_flight = InFlight::new(record, completion, Arc::clone(&self.tracker));
        self.metrics.set_in_flight(self.tracker.in_flight());
        Ok(in_flight)
    }

    /// Hand one message to the bus (single attempt). The returned handle
    /// resolves when the bus acknowledges or rejects it.
    pub async fn publish(&self, message: &AnalysisMessage, key: &PartitionKey) -> Result<InFlight, ProducerError> {
        let payload = self.encode_payload(message)?;
        self.publish_encoded(message, payload, key, 1)
            .await
            .map_err(|source| ProducerError::DeliveryFailure {
                job_id: message.job_identifier().to_string(),
                analysis_id: message.analysis_identifier().to_string(),
                attempts: 1,
                source,
            })
    }

    async fn attempt(
        &self,
        message: &AnalysisMessage,
        payload: Bytes,
        key: &PartitionKey,
        attempt: u32,
        send_timeout: Duration,
    ) -> Result<DeliveryRecord, TransportError> {
        let in_flight = match timeout(send_timeout, self.publish_encoded(message, payload, key, attempt)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout),
        };
        let token = in_flight.token();
        match timeout(send_timeout, in_flight.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.tracker.abandon(token);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Publish and wait for acknowledgment, retrying with bounded exponential
    /// backoff. Exhausted retries surface as `DeliveryFailure`.
    pub async fn send(&self, message: &AnalysisMessage, key: Option<PartitionKey>) -> Result<DeliveryRecord, ProducerError> {
        let key = key.unwrap_or_else(|| self.partition_key(message));
        let payload = self.encode_payload(message)?;
        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
        let mut attempt = 1;

        loop {
            let result = self.attempt(message, payload.clone(), &key, attempt, send_timeout).await;
            self.metrics.set_in_flight(self.tracker.in_flight());

            match result {
                Ok(record) => {
                    self.metrics.inc_published(payload.len());
                    info!(
                        job_id = %record.job_id,
                        analysis_id = %record.analysis_id,
                        key = %record.partition_key,
                        watermark = record.watermark.map(|w| w.value()).unwrap_or(0),
                        attempt = attempt,
                        "Message sent"
                    );
                    return Ok(record);
                }
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        job_id = %message.job_identifier(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    self.metrics.inc_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.metrics.inc_delivery_failure();
                    error!(
                        job_id = %message.job_identifier(),
                        analysis_id = %message.analysis_identifier(),
                        attempts = attempt,
                        error = %e,
                        "Delivery failed, retries exhausted"
                    );
                    return Err(ProducerError::DeliveryFailure {
                        job_id: message.job_identifier().to_string(),
                        analysis_id: message.analysis_identifier().to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finstream_metadata::{Compression, RetryConfig};
    use finstream_middleware::{decode_payload, InMemoryTransport, SubscribeRequest, Watermark};
    use finstream_model::{decode, InstrumentError, InstrumentItem, Nullable};

    fn item(instrument: &str) -> DataItem {
        DataItem::Instrument(InstrumentItem {
            instrumenterror: Nullable::Value(vec![InstrumentError::new(instrument, 1, "warn", "Warning")]),
            ..Default::default()
        })
    }

    fn config() -> ProducerConfig {
        ProducerConfig {
            retry: RetryConfig {
                attempts: 3,
                delay_ms: 1,
                max_delay_ms: 5,
            },
            ..ProducerConfig::default()
        }
    }

    #[test]
    fn test_build_message_rejects_invalid() {
        let err = Producer::build_message("", "an-1", vec![item("Bond_1")]).unwrap_err();
        assert_eq!(err.path, "jobidentifier");
    }

    #[tokio::test]
    async fn test_send_acknowledged_with_headers() {
        let transport = Arc::new(InMemoryTransport::new());
        let producer = Producer::new(transport.clone(), "analysis", config());
        let message = Producer::build_message("job-1", "an-1", vec![item("Bond_1")]).unwrap();

        let record = producer.send(&message, None).await.unwrap();
        assert_eq!(record.state, DeliveryState::Acknowledged);
        assert_eq!(record.watermark, Some(Watermark(1)));
        assert_eq!(record.partition_key.as_str(), "job-1");
        assert_eq!(producer.tracker().in_flight(), 0);

        transport.close_topic("analysis").await;
        let mut sub = transport
            .subscribe(SubscribeRequest {
                topic: "analysis".to_string(),
                subscription_id: "t".to_string(),
                partition: None,
                from: None,
            })
            .await
            .unwrap();
        let received = sub.next().await.unwrap().unwrap();
        assert_eq!(received.headers["message_type"], MESSAGE_TYPE);
        assert_eq!(received.headers["job_id"], "job-1");
        assert_eq!(received.headers["analysis_id"], "an-1");
        assert_eq!(received.headers[CONTENT_ENCODING_HEADER], "gzip");
        assert!(received.headers.contains_key("timestamp"));

        let body = decode_payload(&received.headers, &received.payload).unwrap();
        assert_eq!(decode(&body).unwrap(), message);
    }

    #[tokio::test]
    async fn test_send_retries_negative_ack() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(2);
        let producer = Producer::new(transport.clone(), "analysis", config());
        let message = Producer::build_message("job-1", "an-1", vec![item("Bond_1")]).unwrap();

        let record = producer.send(&message, None).await.unwrap();
        assert_eq!(record.attempt, 3);
        assert_eq!(transport.len("analysis").await, 1);
    }

    #[tokio::test]
    async fn test_send_surfaces_delivery_failure() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(10);
        let producer = Producer::new(transport.clone(), "analysis", config());
        let message = Producer::build_message("job-9", "an-9", vec![item("Bond_1")]).unwrap();

        let err = producer.send(&message, None).await.unwrap_err();
        match err {
            ProducerError::DeliveryFailure { job_id, attempts, .. } => {
                assert_eq!(job_id, "job-9");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(producer.tracker().in_flight(), 0);
        assert!(transport.is_empty("analysis").await);
    }

    #[tokio::test]
    async fn test_publish_returns_pending_record() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut cfg = config();
        cfg.compression = Compression::None;
        let producer = Producer::new(transport, "analysis", cfg);
        let message = Producer::build_message("job-1", "an-1", vec![item("Bond_1")]).unwrap();

        let in_flight = producer.publish(&message, &PartitionKey::new("custom")).await.unwrap();
        assert_eq!(in_flight.record().state, DeliveryState::Pending);
        assert_eq!(producer.tracker().in_flight(), 1);
        let done = in_flight.wait().await.unwrap();
        assert_eq!(done.partition_key.as_str(), "custom");
        assert_eq!(producer.tracker().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_key_strategies() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let message = Producer::build_message("job-1", "an-1", vec![item("Bond_42")]).unwrap();

        let mut cfg = config();
        cfg.key_strategy = KeyStrategy::Instrument;
        let producer = Producer::new(Arc::clone(&transport), "analysis", cfg.clone());
        assert_eq!(producer.partition_key(&message).as_str(), "Bond_42");

        cfg.key_strategy = KeyStrategy::RoundRobin;
        cfg.round_robin_partitions = 2;
        let producer = Producer::new(transport, "analysis", cfg);
        let keys: Vec<_> = (0..3).map(|_| producer.partition_key(&message).as_str().to_string()).collect();
        assert_eq!(keys, vec!["rr-0", "rr-1", "rr-0"]);
    }
}
