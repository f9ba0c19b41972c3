use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use finstream_metadata::AuthConfig;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::subjects::{partition_matches, subject_for, topic_wildcard};
use crate::error::TransportError;
use crate::transport::{
    now_millis, DeliveryToken, PendingAck, SubscribeRequest, Subscription, Transport,
    TransportMessage, Watermark,
};

/// Header carrying the unsanitized partition key
const PARTITION_KEY_HEADER: &str = "partition-key";

/// JetStream pull subscription. The durable consumer uses `AckPolicy::All`, so
/// acking the highest delivered message at or below a watermark acks everything before it.
/// Messages of another partition that share the filter subject are skipped.
struct NatsSubscription {
    topic: String,
    partition: Option<String>,
    messages: pull::Stream,
    unacked: BTreeMap<u64, jetstream::Message>,
}

fn to_transport_message(topic: &str, msg: &jetstream::Message, seq: u64) -> TransportMessage {
    let mut headers = HashMap::new();
    if let Some(nats_headers) = msg.headers.as_ref() {
        for (name, values) in nats_headers.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    let key = headers.remove(PARTITION_KEY_HEADER).unwrap_or_else(|| {
        msg.subject
            .as_str()
            .strip_prefix(topic)
            .map(|rest| rest.trim_start_matches('.').to_string())
            .unwrap_or_default()
    });

    TransportMessage {
        topic: topic.to_string(),
        key,
        payload: msg.payload.clone(),
        headers,
        watermark: Watermark(seq),
        timestamp: now_millis(),
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        loop {
            let Some(result) = self.messages.next().await else {
                return Ok(None);
            };
            let msg = result.map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
            let seq = msg
                .info()
                .map(|i| i.stream_sequence)
                .map_err(|e| TransportError::SubscribeFailed(format!("missing message info: {}", e)))?;

            let header_key = msg
                .headers
                .as_ref()
                .and_then(|h| h.get(PARTITION_KEY_HEADER))
                .map(|v| v.to_string());
            let transport_msg = to_transport_message(&self.topic, &msg, seq);
            self.unacked.insert(seq, msg);

            if partition_matches(self.partition.as_deref(), header_key.as_deref()) {
                return Ok(Some(transport_msg));
            }
            debug!(seq = seq, key = %transport_msg.key, "Skipping message of a colliding partition");
        }
    }

    async fn ack(&mut self, watermark: Watermark) -> Result<(), TransportError> {
        let Some((&seq, msg)) = self.unacked.range(..=watermark.value()).next_back() else {
            return Ok(());
        };
        msg.ack()
            .await
            .map_err(|e| TransportError::AckFailed(format!("seq {}: {}", seq, e)))?;
        self.unacked = self.unacked.split_off(&(watermark.value() + 1));
        Ok(())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        if !self.unacked.is_empty() {
            debug!(
                pending = self.unacked.len(),
                "Closing subscription with unacked messages; they will be redelivered"
            );
        }
        Ok(())
    }
}

/// NATS JetStream transport implementation
pub struct NatsTransport {
    jetstream: Context,
    stream_name: String,
    tokens: AtomicU64,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: async_nats::Client, stream_name: impl Into<String>) -> Self {
        Self {
            jetstream: jetstream::new(client),
            stream_name: stream_name.into(),
            tokens: AtomicU64::new(1),
        }
    }

    /// Connect to NATS server and create transport
    pub async fn connect(
        url: &str,
        auth: &AuthConfig,
        stream_name: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let options = connect_options(auth).await?;
        let client = options
            .connect(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(url = %url, "Connected to NATS");
        Ok(Self::new(client, stream_name))
    }

    /// Get JetStream context for stream operations
    pub fn jetstream(&self) -> &Context {
        &self.jetstream
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Create or get the JetStream stream retaining every partition of `topic`
    pub async fn ensure_stream(&self, topic: &str) -> Result<(), TransportError> {
        let config = Config {
            name: self.stream_name.clone(),
            subjects: vec![topic_wildcard(topic)],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("stream creation failed: {}", e)))?;

        Ok(())
    }
}

async fn connect_options(auth: &AuthConfig) -> Result<ConnectOptions, TransportError> {
    let options = match auth {
        AuthConfig::None => ConnectOptions::new(),
        AuthConfig::Token { token_env } => ConnectOptions::with_token(secret_from_env(token_env)?),
        AuthConfig::UserPassword { user, password_env } => {
            ConnectOptions::with_user_and_password(user.clone(), secret_from_env(password_env)?)
        }
        AuthConfig::CredentialsFile { path } => ConnectOptions::with_credentials_file(path.clone())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("credentials file: {}", e)))?,
    };
    Ok(options.name("finstream"))
}

fn secret_from_env(var: &str) -> Result<String, TransportError> {
    std::env::var(var)
        .map_err(|_| TransportError::ConnectionFailed(format!("environment variable {} is not set", var)))
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<PendingAck, TransportError> {
        let token = DeliveryToken(self.tokens.fetch_add(1, Ordering::Relaxed));

        let mut nats_headers = async_nats::HeaderMap::new();
        for (k, v) in headers {
            nats_headers.insert(k, v);
        }
        nats_headers.insert(PARTITION_KEY_HEADER, key.to_string());

        let ack_future = self
            .jetstream
            .publish_with_headers(subject_for(topic, key), nats_headers, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = ack_future
                .await
                .map(|ack| Watermark(ack.sequence))
                .map_err(|e| TransportError::PublishFailed(e.to_string()));
            if tx.send(result).is_err() {
                warn!(token = %token, "Publish completion dropped before acknowledgment");
            }
        });

        Ok(PendingAck::new(token, rx))
    }

    async fn subscribe(&self, request: SubscribeRequest) -> Result<Box<dyn Subscription>, TransportError> {
        let filter_subject = match &request.partition {
            Some(partition) => subject_for(&request.topic, partition),
            None => topic_wildcard(&request.topic),
        };
        let deliver_policy = match request.from {
            Some(wm) => DeliverPolicy::ByStartSequence {
                start_sequence: wm.value() + 1,
            },
            None => DeliverPolicy::All,
        };

        let consumer: jetstream::consumer::PullConsumer = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| TransportError::SubscribeFailed(format!("stream not found: {}", e)))?
            .get_or_create_consumer(
                &request.subscription_id,
                pull::Config {
                    durable_name: Some(request.subscription_id.clone()),
                    filter_subject: filter_subject.clone(),
                    ack_policy: AckPolicy::All,
                    deliver_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        info!(
            stream = %self.stream_name,
            consumer = %request.subscription_id,
            filter = %filter_subject,
            from = request.from.map(|w| w.value()).unwrap_or(0),
            "Subscribed to NATS JetStream"
        );

        Ok(Box::new(NatsSubscription {
            topic: request.topic,
            partition: request.partition,
            messages,
            unacked: BTreeMap::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running NATS server with JetStream
    // Run: docker run -p 4222:4222 nats:latest -js

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream
    async fn test_ensure_stream() {
        let transport = NatsTransport::connect("nats://localhost:4222", &AuthConfig::None, "FINSTREAM_TEST")
            .await
            .unwrap();
        let result = transport.ensure_stream("finstream-test").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_token_env_fails() {
        let auth = AuthConfig::Token {
            token_env: "FINSTREAM_TEST_TOKEN_THAT_IS_NOT_SET".to_string(),
        };
        let result = connect_options(&auth).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
