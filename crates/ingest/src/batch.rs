//! Micro-batch accumulation for one subscription.
//!
//! The accumulator tracks two positions: the committed watermark (durable)
//! and the highest watermark accounted for since then, which covers both
//! batched and quarantined messages. A flush hands out everything accounted
//! for as one [`Batch`]; the commit then moves the committed watermark up.

use std::time::Duration;

use finstream_middleware::Watermark;
use finstream_model::AnalysisMessage;
use tokio::time::Instant;
use tracing::warn;

/// A decoded, valid message with its bus position
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub watermark: Watermark,
    pub key: String,
    pub message: AnalysisMessage,
}

/// Messages committed together, and the watermark they advance the checkpoint to
#[derive(Debug)]
pub struct Batch {
    pub subscription_id: String,
    pub messages: Vec<ReceivedMessage>,
    pub watermark: Watermark,
    pub first_arrival: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total data items across the batch (one table row each)
    pub fn item_count(&self) -> usize {
        self.messages.iter().map(|m| m.message.data().len()).sum()
    }
}

/// Gap between the expected and the received sequence, and the next expected sequence.
///
/// Returns `Some((after, missing))` when `seq` skips ahead of `expected`. A
/// redelivered (lower) sequence never moves the expectation backwards.
pub fn compute_gap_and_next(expected: Option<u64>, seq: u64) -> (Option<(u64, u64)>, Option<u64>) {
    let gap = match expected {
        Some(expected) if seq > expected => Some((expected.saturating_sub(1), seq - expected)),
        _ => None,
    };

    let next_expected = match (expected, seq) {
        (_, 0) => expected,
        (Some(exp), _) if seq < exp => expected,
        _ => Some(seq + 1),
    };

    (gap, next_expected)
}

pub struct BatchAccumulator {
    subscription_id: String,
    max_items: usize,
    max_linger: Duration,
    pending: Vec<ReceivedMessage>,
    first_arrival: Option<Instant>,
    committed: Watermark,
    /// Highest watermark batched or quarantined
    accounted: Watermark,
    expected_seq: Option<u64>,
    /// Partition-filtered subscriptions see sparse watermarks
    track_gaps: bool,
    gaps: u64,
}

impl BatchAccumulator {
    pub fn new(
        subscription_id: impl Into<String>,
        max_items: usize,
        max_linger: Duration,
        committed: Option<Watermark>,
    ) -> Self {
        let committed = committed.unwrap_or_default();
        Self {
            subscription_id: subscription_id.into(),
            max_items: max_items.max(1),
            max_linger,
            pending: Vec::with_capacity(max_items.clamp(1, 1024)),
            first_arrival: None,
            committed,
            accounted: committed,
            expected_seq: None,
            track_gaps: true,
            gaps: 0,
        }
    }

    /// Disable gap warnings (partition-filtered subscriptions)
    pub fn without_gap_tracking(mut self) -> Self {
        self.track_gaps = false;
        self
    }

    /// Record the arrival of `watermark`. Returns `false` for a redelivery
    /// already batched, quarantined or committed, which must be skipped.
    pub fn observe(&mut self, watermark: Watermark) -> bool {
        if watermark <= self.accounted {
            return false;
        }

        if self.track_gaps {
            let expected = self.expected_seq.or(Some(self.accounted.value() + 1));
            let (gap, next) = compute_gap_and_next(expected, watermark.value());
            if let Some((after, missing)) = gap {
                self.gaps += 1;
                warn!(
                    subscription = %self.subscription_id,
                    after = after,
                    missing = missing,
                    watermark = watermark.value(),
                    "Gap detected in watermarks"
                );
            }
            self.expected_seq = next;
        }
        true
    }

    /// Add a valid message. Returns `true` once the batch is full.
    pub fn push(&mut self, message: ReceivedMessage) -> bool {
        self.account(message.watermark);
        self.pending.push(message);
        self.is_full()
    }

    /// Account for a quarantined message so the next commit covers it
    pub fn skip(&mut self, watermark: Watermark) {
        self.account(watermark);
    }

    fn account(&mut self, watermark: Watermark) {
        if self.first_arrival.is_none() {
            self.first_arrival = Some(Instant::now());
        }
        if watermark > self.accounted {
            self.accounted = watermark;
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_items
    }

    /// Whether anything beyond the committed watermark awaits a commit
    pub fn has_uncommitted(&self) -> bool {
        self.accounted > self.committed
    }

    /// When the linger timer fires for the current batch
    pub fn deadline(&self) -> Option<Instant> {
        self.first_arrival.map(|t| t + self.max_linger)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn committed(&self) -> Watermark {
        self.committed
    }

    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Hand out the accumulated batch. `None` when nothing awaits a commit.
    pub fn take(&mut self) -> Option<Batch> {
        if !self.has_uncommitted() {
            return None;
        }
        let first_arrival = self.first_arrival.take().unwrap_or_else(Instant::now);
        Some(Batch {
            subscription_id: self.subscription_id.clone(),
            messages: std::mem::take(&mut self.pending),
            watermark: self.accounted,
            first_arrival,
        })
    }

    /// Record a successful commit
    pub fn mark_committed(&mut self, watermark: Watermark) {
        if watermark > self.committed {
            self.committed = watermark;
        }
        if self.committed > self.accounted {
            self.accounted = self.committed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finstream_model::{DataItem, InstrumentError, InstrumentItem, Nullable};

    fn received(wm: u64) -> ReceivedMessage {
        let item = DataItem::Instrument(InstrumentItem {
            instrumenterror: Nullable::Value(vec![InstrumentError::new("Bond_1", 1, "w", "Warning")]),
            ..Default::default()
        });
        ReceivedMessage {
            watermark: Watermark(wm),
            key: "job-1".to_string(),
            message: AnalysisMessage::new(format!("job-{wm}"), "an-1", vec![item]).unwrap(),
        }
    }

    #[test]
    fn test_compute_gap_and_next_detects_gap() {
        let (gap, next) = compute_gap_and_next(Some(101), 105);
        assert_eq!(gap, Some((100, 4)));
        assert_eq!(next, Some(106));
    }

    #[test]
    fn test_compute_gap_and_next_no_regress_on_redelivery() {
        let (gap, next) = compute_gap_and_next(Some(101), 50);
        assert_eq!(gap, None);
        assert_eq!(next, Some(101));
    }

    #[test]
    fn test_compute_gap_and_next_ignores_zero() {
        let (gap, next) = compute_gap_and_next(Some(17), 0);
        assert_eq!(gap, None);
        assert_eq!(next, Some(17));
    }

    #[tokio::test]
    async fn test_full_batch() {
        let mut acc = BatchAccumulator::new("sub", 2, Duration::from_secs(5), None);
        assert!(acc.observe(Watermark(1)));
        assert!(!acc.push(received(1)));
        assert!(acc.observe(Watermark(2)));
        assert!(acc.push(received(2)));

        let batch = acc.take().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.watermark, Watermark(2));
        assert_eq!(batch.item_count(), 2);
        assert!(acc.deadline().is_none());
    }

    #[tokio::test]
    async fn test_redelivered_messages_are_skipped() {
        let mut acc = BatchAccumulator::new("sub", 10, Duration::from_secs(5), Some(Watermark(3)));
        assert!(!acc.observe(Watermark(2)));
        assert!(!acc.observe(Watermark(3)));
        assert!(acc.observe(Watermark(4)));
        acc.push(received(4));
        assert!(!acc.observe(Watermark(4)));
    }

    #[tokio::test]
    async fn test_quarantined_only_batch_still_commits() {
        let mut acc = BatchAccumulator::new("sub", 10, Duration::from_secs(5), None);
        assert!(acc.observe(Watermark(1)));
        acc.skip(Watermark(1));
        assert!(acc.has_uncommitted());
        assert!(acc.deadline().is_some());

        let batch = acc.take().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.watermark, Watermark(1));

        acc.mark_committed(batch.watermark);
        assert!(!acc.has_uncommitted());
        assert!(acc.take().is_none());
    }

    #[tokio::test]
    async fn test_gap_is_counted() {
        let mut acc = BatchAccumulator::new("sub", 10, Duration::from_secs(5), None);
        assert!(acc.observe(Watermark(1)));
        acc.push(received(1));
        assert!(acc.observe(Watermark(4)));
        assert_eq!(acc.gaps(), 1);

        let mut sparse = BatchAccumulator::new("sub", 10, Duration::from_secs(5), None).without_gap_tracking();
        assert!(sparse.observe(Watermark(7)));
        assert_eq!(sparse.gaps(), 0);
    }

    #[tokio::test]
    async fn test_commit_never_regresses() {
        let mut acc = BatchAccumulator::new("sub", 10, Duration::from_secs(5), Some(Watermark(10)));
        acc.mark_committed(Watermark(4));
        assert_eq!(acc.committed(), Watermark(10));
    }
}
