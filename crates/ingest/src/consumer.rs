//! Per-subscription consumer: receive, validate, accumulate, commit, ack.
//!
//! `Starting -> Streaming -> (Flushing <-> Streaming) -> Stopped`
//!
//! A batch is flushed when it is full, when its linger elapses, when
//! [`FlushHandle::flush_now`] is called, at the end of a bounded stream, or once
//! on shutdown. The bus is acked only after the table commit and checkpoint
//! both succeeded, so anything not yet committed is redelivered after a crash.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use finstream_metadata::{PipelineConfig, SubscriptionSpec};
use finstream_middleware::{
    decode_payload, RetryPolicy, SubscribeRequest, Subscription, Transport, TransportMessage,
    Watermark,
};
use finstream_model::{decode, SchemaViolation};
use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchAccumulator, ReceivedMessage};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::IngestError;
use crate::metrics::IngestMetrics;
use crate::quarantine::{QuarantineRecord, QuarantineSink};
use crate::writer::TableWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Streaming,
    Flushing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Count,
    Linger,
    Requested,
    EndOfStream,
    Shutdown,
}

/// Asks a running consumer to flush its current batch
#[derive(Clone, Default)]
pub struct FlushHandle {
    notify: Arc<Notify>,
}

impl FlushHandle {
    /// Flush at the next opportunity. Requests made before the consumer
    /// reaches its wait point are not lost.
    pub fn flush_now(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub subscription_id: String,
    pub received: u64,
    pub duplicates: u64,
    pub quarantined: u64,
    pub batches: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub gaps: u64,
    pub last_committed: Option<Watermark>,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub subscription: SubscriptionSpec,
    pub max_batch_items: usize,
    pub max_linger: Duration,
    pub commit_retry: RetryPolicy,
    pub transport_retry: RetryPolicy,
    pub stats_interval: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &PipelineConfig, subscription: &SubscriptionSpec) -> Self {
        Self {
            topic: config.bus.topic.clone(),
            subscription: subscription.clone(),
            max_batch_items: config.consumer.max_batch_items,
            max_linger: Duration::from_millis(config.consumer.max_linger_ms),
            commit_retry: RetryPolicy::from(&config.consumer.commit_retry),
            transport_retry: RetryPolicy::from(&config.consumer.transport_retry),
            stats_interval: Duration::from_secs(config.consumer.stats_interval_secs.max(1)),
        }
    }
}

/// Run `attempt` until it succeeds, a non-retryable error occurs or the policy is exhausted
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    subscription: &str,
    on_error: impl Fn(&IngestError),
    mut attempt_fn: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                on_error(&e);
                if !e.is_retryable() || !policy.should_retry(attempt) {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    subscription = %subscription,
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub struct IngestConsumer {
    settings: ConsumerSettings,
    transport: Arc<dyn Transport>,
    writer: Arc<TableWriter>,
    checkpoints: Arc<CheckpointManager>,
    quarantine: Arc<dyn QuarantineSink>,
    flush: FlushHandle,
    state: watch::Sender<ConsumerState>,
    stats: ConsumerStats,
    metrics: IngestMetrics,
}

impl IngestConsumer {
    pub fn new(
        settings: ConsumerSettings,
        transport: Arc<dyn Transport>,
        writer: Arc<TableWriter>,
        checkpoints: Arc<CheckpointManager>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Self {
        let id = settings.subscription.id.clone();
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            metrics: IngestMetrics::new(id.clone()),
            stats: ConsumerStats {
                subscription_id: id,
                ..ConsumerStats::default()
            },
            settings,
            transport,
            writer,
            checkpoints,
            quarantine,
            flush: FlushHandle::default(),
            state,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.settings.subscription.id
    }

    pub fn flush_handle(&self) -> FlushHandle {
        self.flush.clone()
    }

    /// Observe state transitions while the consumer runs
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Consume until the stream ends or `shutdown` is cancelled.
    ///
    /// A commit that keeps failing halts the subscription with
    /// [`IngestError::IngestionFailure`]; the checkpoint then still points just
    /// after the last successful commit.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ConsumerStats, IngestError> {
        let result = self.stream(&shutdown).await;
        self.transition(ConsumerState::Stopped);

        match result {
            Ok(()) => {
                info!(
                    subscription = %self.stats.subscription_id,
                    received = self.stats.received,
                    batches = self.stats.batches,
                    rows = self.stats.rows_written,
                    quarantined = self.stats.quarantined,
                    watermark = self.stats.last_committed.map(Watermark::value).unwrap_or(0),
                    "Consumer stopped"
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!(
                    subscription = %self.stats.subscription_id,
                    last_committed = ?self.stats.last_committed,
                    error = %e,
                    "Subscription halted"
                );
                Err(IngestError::IngestionFailure {
                    subscription: self.stats.subscription_id.clone(),
                    last_committed: self.stats.last_committed,
                    source: Box::new(e),
                })
            }
        }
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(
                subscription = %self.settings.subscription.id,
                from = ?previous,
                to = ?next,
                "Consumer state"
            );
        }
    }

    async fn subscribe(&self, committed: Option<Watermark>) -> Result<Box<dyn Subscription>, IngestError> {
        let request = SubscribeRequest {
            topic: self.settings.topic.clone(),
            subscription_id: self.settings.subscription.id.clone(),
            partition: self.settings.subscription.partition.clone(),
            from: committed.filter(|w| *w > Watermark::ZERO),
        };
        let transport = Arc::clone(&self.transport);
        let subscription = with_retry(
            &self.settings.transport_retry,
            "subscribe",
            &self.settings.subscription.id,
            |_| {},
            || {
                let request = request.clone();
                let transport = Arc::clone(&transport);
                async move { transport.subscribe(request).await.map_err(IngestError::from) }
            },
        )
        .await?;
        info!(
            subscription = %self.settings.subscription.id,
            topic = %self.settings.topic,
            partition = ?self.settings.subscription.partition,
            from = committed.map(Watermark::value).unwrap_or(0),
            "Subscribed"
        );
        Ok(subscription)
    }

    async fn stream(&mut self, shutdown: &CancellationToken) -> Result<(), IngestError> {
        self.transition(ConsumerState::Starting);
        let id = self.settings.subscription.id.clone();

        let checkpoint = self.checkpoints.load(&id).await?;
        let committed = checkpoint.as_ref().map(Checkpoint::watermark);
        self.stats.last_committed = committed;

        let mut subscription = self.subscribe(committed).await?;
        let mut acc = BatchAccumulator::new(
            id.clone(),
            self.settings.max_batch_items,
            self.settings.max_linger,
            committed,
        );
        if self.settings.subscription.partition.is_some() {
            acc = acc.without_gap_tracking();
        }

        self.transition(ConsumerState::Streaming);
        let flush = self.flush.clone();
        let mut stats_tick = interval_at(Instant::now() + self.settings.stats_interval, self.settings.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_failures = 0u32;

        loop {
            // select! evaluates this even when the branch is disabled
            let linger_at = acc
                .deadline()
                .unwrap_or_else(|| Instant::now() + self.settings.max_linger);

            let trigger = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(subscription = %id, pending = acc.pending_len(), "Shutdown signal received");
                    Some(FlushTrigger::Shutdown)
                }
                _ = flush.requested() => Some(FlushTrigger::Requested),
                _ = sleep_until(linger_at), if acc.deadline().is_some() => Some(FlushTrigger::Linger),
                _ = stats_tick.tick() => {
                    self.log_stats(&acc);
                    None
                }
                next = subscription.next() => match next {
                    Ok(Some(message)) => {
                        transport_failures = 0;
                        self.accept(&mut acc, message).await?.then_some(FlushTrigger::Count)
                    }
                    Ok(None) => {
                        info!(subscription = %id, "End of stream");
                        Some(FlushTrigger::EndOfStream)
                    }
                    Err(e) => {
                        transport_failures += 1;
                        if !self.settings.transport_retry.should_retry(transport_failures) {
                            return Err(e.into());
                        }
                        let delay = self.settings.transport_retry.delay_for(transport_failures);
                        warn!(
                            subscription = %id,
                            attempt = transport_failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Receive failed, resubscribing"
                        );
                        sleep(delay).await;
                        let resumed = self.subscribe(Some(acc.committed())).await?;
                        let previous = std::mem::replace(&mut subscription, resumed);
                        let _ = previous.unsubscribe().await;
                        None
                    }
                },
            };

            if let Some(trigger) = trigger {
                self.flush_batch(&mut acc, subscription.as_mut(), trigger).await?;
                if matches!(trigger, FlushTrigger::EndOfStream | FlushTrigger::Shutdown) {
                    break;
                }
            }
        }

        self.stats.gaps = acc.gaps();
        if let Err(e) = subscription.unsubscribe().await {
            warn!(subscription = %id, error = %e, "Unsubscribe failed");
        }
        Ok(())
    }

    /// Route one received message. Returns `true` when the batch became full.
    async fn accept(&mut self, acc: &mut BatchAccumulator, message: TransportMessage) -> Result<bool, IngestError> {
        self.stats.received += 1;
        self.metrics.inc_message();

        if !acc.observe(message.watermark) {
            self.stats.duplicates += 1;
            self.metrics.inc_duplicate();
            debug!(
                subscription = %self.settings.subscription.id,
                watermark = message.watermark.value(),
                "Skipping redelivered message"
            );
            return Ok(false);
        }

        let payload = match decode_payload(&message.headers, &message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                let violation = SchemaViolation::new("$", format!("undecodable payload: {}", e));
                self.quarantine(acc, &message, &message.payload, violation).await?;
                return Ok(false);
            }
        };

        match decode(&payload) {
            Ok(decoded) => Ok(acc.push(ReceivedMessage {
                watermark: message.watermark,
                key: message.key,
                message: decoded,
            })),
            Err(violation) => {
                self.quarantine(acc, &message, &payload, violation).await?;
                Ok(false)
            }
        }
    }

    async fn quarantine(
        &mut self,
        acc: &mut BatchAccumulator,
        message: &TransportMessage,
        payload: &[u8],
        violation: SchemaViolation,
    ) -> Result<(), IngestError> {
        let record = QuarantineRecord::new(
            self.settings.subscription.id.clone(),
            message.watermark,
            message.key.clone(),
            payload,
            &violation,
        );
        let sink = Arc::clone(&self.quarantine);
        with_retry(
            &self.settings.commit_retry,
            "quarantine",
            &self.settings.subscription.id,
            |_| {},
            || sink.quarantine(record.clone()),
        )
        .await?;

        acc.skip(message.watermark);
        self.stats.quarantined += 1;
        self.metrics.inc_quarantined();
        Ok(())
    }

    async fn flush_batch(
        &mut self,
        acc: &mut BatchAccumulator,
        subscription: &mut dyn Subscription,
        trigger: FlushTrigger,
    ) -> Result<(), IngestError> {
        let Some(batch) = acc.take() else {
            return Ok(());
        };
        self.transition(ConsumerState::Flushing);

        let id = self.settings.subscription.id.clone();
        debug!(
            subscription = %id,
            trigger = ?trigger,
            messages = batch.len(),
            watermark = batch.watermark.value(),
            waited_ms = batch.first_arrival.elapsed().as_millis() as u64,
            "Flushing batch"
        );

        let checkpoints = Arc::clone(&self.checkpoints);
        let writer = Arc::clone(&self.writer);
        let metrics = self.metrics.clone();
        let schema_version = writer.schema_version();
        let committed = with_retry(
            &self.settings.commit_retry,
            "commit",
            &id,
            |_| metrics.inc_commit_failure(),
            || checkpoints.commit_atomically(&id, batch.watermark, schema_version, || writer.apply_batch(&batch)),
        )
        .await?;

        acc.mark_committed(batch.watermark);
        let result = committed.output;
        self.stats.batches += 1;
        self.stats.rows_written += result.rows_written as u64;
        self.stats.rows_skipped += result.rows_skipped as u64;
        self.stats.last_committed = Some(batch.watermark);
        self.metrics.record_commit(result.rows_written, batch.watermark.value());

        info!(
            subscription = %id,
            trigger = ?trigger,
            commit = %result.commit_id,
            messages = batch.len(),
            rows = result.rows_written,
            skipped = result.rows_skipped,
            watermark = batch.watermark.value(),
            "Committed batch"
        );

        self.ack(subscription, batch.watermark).await;
        self.transition(ConsumerState::Streaming);
        Ok(())
    }

    /// Ack the bus up to a committed watermark. Failure is not fatal: the
    /// checkpoint already covers these messages and redeliveries are skipped.
    async fn ack(&self, subscription: &mut dyn Subscription, watermark: Watermark) {
        let policy = &self.settings.transport_retry;
        let mut attempt = 1;
        loop {
            match subscription.ack(watermark).await {
                Ok(()) => return,
                Err(e) if policy.should_retry(attempt) => {
                    warn!(
                        subscription = %self.settings.subscription.id,
                        watermark = watermark.value(),
                        attempt = attempt,
                        error = %e,
                        "Ack failed, retrying"
                    );
                    sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        subscription = %self.settings.subscription.id,
                        watermark = watermark.value(),
                        error = %e,
                        "Ack failed, committed messages will be redelivered and skipped"
                    );
                    return;
                }
            }
        }
    }

    fn log_stats(&self, acc: &BatchAccumulator) {
        info!(
            subscription = %self.stats.subscription_id,
            received = self.stats.received,
            duplicates = self.stats.duplicates,
            quarantined = self.stats.quarantined,
            batches = self.stats.batches,
            rows = self.stats.rows_written,
            pending = acc.pending_len(),
            gaps = acc.gaps(),
            watermark = acc.committed().value(),
            "Consumer stats"
        );
    }
}
