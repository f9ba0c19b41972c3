//! Count/linger batching in front of a [`Producer`].
//!
//! Enqueued messages are grouped until `batch_max_messages` are waiting or
//! `batch_max_delay_ms` has elapsed since the first one, then the group is
//! dispatched. Messages sharing a partition key go out one at a time, each
//! delivery (retries included) finishing before the next one for that key
//! starts, across groups as well as within one. Distinct keys send
//! concurrently. A semaphore of `max_pending_messages` permits bounds queued
//! plus in-flight messages, so `enqueue` waits when the bus falls behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use finstream_model::AnalysisMessage;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::delivery::DeliveryRecord;
use crate::error::ProducerError;
use crate::partition::PartitionKey;
use crate::producer::Producer;

type DeliveryResult = Result<DeliveryRecord, ProducerError>;

/// Completion signal of the most recent dispatch per partition key
type Lanes = HashMap<PartitionKey, oneshot::Receiver<()>>;

struct Enqueued {
    message: AnalysisMessage,
    key: Option<PartitionKey>,
    reply: oneshot::Sender<DeliveryResult>,
    _permit: OwnedSemaphorePermit,
}

/// Receiver for the outcome of one enqueued message
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryReceipt {
    pub async fn wait(self) -> DeliveryResult {
        self.rx.await.map_err(|_| ProducerError::Closed)?
    }
}

pub struct BatchingProducer {
    tx: mpsc::Sender<Enqueued>,
    permits: Arc<Semaphore>,
    worker: JoinHandle<()>,
}

impl BatchingProducer {
    /// Start the batching worker. With batching disabled every message is its own group.
    pub fn spawn(producer: Arc<Producer>) -> Self {
        let config = producer.config();
        let (max_messages, linger) = if config.batching_enabled {
            (
                config.batch_max_messages.max(1),
                Duration::from_millis(config.batch_max_delay_ms),
            )
        } else {
            (1, Duration::ZERO)
        };
        let max_pending = config.max_pending_messages.max(1);

        let permits = Arc::new(Semaphore::new(max_pending));
        let (tx, rx) = mpsc::channel(max_pending);
        let worker = tokio::spawn(run(producer, rx, max_messages, linger));

        Self { tx, permits, worker }
    }

    /// Queue a message for sending. Waits while `max_pending_messages` are outstanding.
    pub async fn enqueue(&self, message: AnalysisMessage, key: Option<PartitionKey>) -> Result<DeliveryReceipt, ProducerError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProducerError::Closed)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Enqueued {
                message,
                key,
                reply,
                _permit: permit,
            })
            .await
            .map_err(|_| ProducerError::Closed)?;
        Ok(DeliveryReceipt { rx })
    }

    /// Stop accepting messages, flush what is queued and wait for every delivery
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

async fn run(
    producer: Arc<Producer>,
    mut rx: mpsc::Receiver<Enqueued>,
    max_messages: usize,
    linger: Duration,
) {
    let mut pending: Vec<Enqueued> = Vec::with_capacity(max_messages);
    let mut deadline: Option<Instant> = None;
    let mut dispatches = JoinSet::new();
    let mut lanes = Lanes::new();

    loop {
        // select! evaluates this even when the branch is disabled
        let linger_at = deadline.unwrap_or_else(|| Instant::now() + linger);

        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => {
                    if pending.is_empty() {
                        deadline = Some(Instant::now() + linger);
                    }
                    pending.push(entry);
                    if pending.len() >= max_messages {
                        debug!(count = pending.len(), "Batch full, dispatching");
                        dispatch(&producer, std::mem::take(&mut pending), &mut lanes, &mut dispatches);
                        deadline = None;
                    }
                }
                None => break,
            },
            _ = sleep_until(linger_at), if deadline.is_some() => {
                debug!(count = pending.len(), "Linger elapsed, dispatching");
                dispatch(&producer, std::mem::take(&mut pending), &mut lanes, &mut dispatches);
                deadline = None;
            }
        }

        while dispatches.try_join_next().is_some() {}
    }

    if !pending.is_empty() {
        dispatch(&producer, pending, &mut lanes, &mut dispatches);
    }
    while dispatches.join_next().await.is_some() {}
    info!(topic = %producer.topic(), "Batching producer drained");
}

/// Split a group by partition key and spawn one sequential sender per key.
/// Each sender waits for the previous dispatch of its key before sending.
fn dispatch(producer: &Arc<Producer>, group: Vec<Enqueued>, lanes: &mut Lanes, dispatches: &mut JoinSet<()>) {
    let mut order: Vec<PartitionKey> = Vec::new();
    let mut by_key: HashMap<PartitionKey, Vec<Enqueued>> = HashMap::new();
    for mut entry in group {
        let key = entry
            .key
            .take()
            .unwrap_or_else(|| producer.partition_key(&entry.message));
        by_key
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(entry);
    }

    lanes.retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));

    for key in order {
        let Some(entries) = by_key.remove(&key) else {
            continue;
        };
        let (done_tx, done_rx) = oneshot::channel();
        let previous = lanes.insert(key.clone(), done_rx);
        let producer = Arc::clone(producer);
        dispatches.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            for entry in entries {
                let result = producer.send(&entry.message, Some(key.clone())).await;
                let _ = entry.reply.send(result);
            }
            let _ = done_tx.send(());
        });
    }
}
