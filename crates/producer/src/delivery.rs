//! Tracking of in-flight publishes.
//!
//! Each publish registers a [`DeliveryRecord`] under its delivery token. The
//! record is transitioned and removed only by the completion of that token,
//! so there is exactly one writer per record.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use finstream_middleware::{DeliveryToken, PendingAck, TransportError, Watermark};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::partition::PartitionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub job_id: String,
    pub analysis_id: String,
    pub partition_key: PartitionKey,
    pub token: DeliveryToken,
    pub sent_at: DateTime<Utc>,
    pub attempt: u32,
    pub state: DeliveryState,
    /// Bus position, set once acknowledged
    pub watermark: Option<Watermark>,
}

#[derive(Default)]
pub struct DeliveryTracker {
    records: DashMap<DeliveryToken, DeliveryRecord>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: DeliveryRecord) {
        self.records.insert(record.token, record);
    }

    /// Apply the bus outcome for `token`, log it and drop the record.
    pub fn complete(
        &self,
        token: DeliveryToken,
        outcome: &Result<Watermark, TransportError>,
    ) -> Option<DeliveryRecord> {
        let (_, mut record) = self.records.remove(&token)?;
        match outcome {
            Ok(watermark) => {
                record.state = DeliveryState::Acknowledged;
                record.watermark = Some(*watermark);
                debug!(
                    job_id = %record.job_id,
                    analysis_id = %record.analysis_id,
                    key = %record.partition_key,
                    attempt = record.attempt,
                    watermark = watermark.value(),
                    "Delivery acknowledged"
                );
            }
            Err(e) => {
                record.state = DeliveryState::Failed;
                warn!(
                    job_id = %record.job_id,
                    analysis_id = %record.analysis_id,
                    key = %record.partition_key,
                    attempt = record.attempt,
                    error = %e,
                    "Delivery failed"
                );
            }
        }
        Some(record)
    }

    /// Mark a delivery as failed after its completion was abandoned (send timeout)
    pub fn abandon(&self, token: DeliveryToken) -> Option<DeliveryRecord> {
        self.complete(token, &Err(TransportError::Timeout))
    }

    /// Snapshot of a pending record
    pub fn get(&self, token: DeliveryToken) -> Option<DeliveryRecord> {
        self.records.get(&token).map(|r| r.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.records.len()
    }
}

/// A publish handed to the bus and awaiting acknowledgment
pub struct InFlight {
    record: DeliveryRecord,
    completion: PendingAck,
    tracker: Arc<DeliveryTracker>,
}

impl InFlight {
    pub(crate) fn new(record: DeliveryRecord, completion: PendingAck, tracker: Arc<DeliveryTracker>) -> Self {
        tracker.register(record.clone());
        Self {
            record,
            completion,
            tracker,
        }
    }

    /// The record as registered (state `Pending`)
    pub fn record(&self) -> &DeliveryRecord {
        &self.record
    }

    pub fn token(&self) -> DeliveryToken {
        self.record.token
    }

    /// Wait for the bus outcome. Returns the terminal record on acknowledgment.
    pub async fn wait(self) -> Result<DeliveryRecord, TransportError> {
        let token = self.record.token;
        let outcome = self.completion.wait().await;
        let terminal = self.tracker.complete(token, &outcome);
        match outcome {
            Ok(watermark) => Ok(terminal.unwrap_or_else(|| {
                let mut record = self.record;
                record.state = DeliveryState::Acknowledged;
                record.watermark = Some(watermark);
                record
            })),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: u64) -> DeliveryRecord {
        DeliveryRecord {
            job_id: "job-1".to_string(),
            analysis_id: "an-1".to_string(),
            partition_key: PartitionKey::new("job-1"),
            token: DeliveryToken(token),
            sent_at: Utc::now(),
            attempt: 1,
            state: DeliveryState::Pending,
            watermark: None,
        }
    }

    #[test]
    fn test_complete_acknowledged_removes_record() {
        let tracker = DeliveryTracker::new();
        tracker.register(record(1));
        assert_eq!(tracker.in_flight(), 1);

        let done = tracker.complete(DeliveryToken(1), &Ok(Watermark(12))).unwrap();
        assert_eq!(done.state, DeliveryState::Acknowledged);
        assert_eq!(done.watermark, Some(Watermark(12)));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_complete_failed() {
        let tracker = DeliveryTracker::new();
        tracker.register(record(2));
        let done = tracker
            .complete(DeliveryToken(2), &Err(TransportError::PublishFailed("nack".into())))
            .unwrap();
        assert_eq!(done.state, DeliveryState::Failed);
        assert!(done.watermark.is_none());
    }

    #[test]
    fn test_second_completion_is_ignored() {
        let tracker = DeliveryTracker::new();
        tracker.register(record(3));
        assert!(tracker.complete(DeliveryToken(3), &Ok(Watermark(1))).is_some());
        assert!(tracker.complete(DeliveryToken(3), &Ok(Watermark(1))).is_none());
    }

    #[tokio::test]
    async fn test_in_flight_wait() {
        let tracker = Arc::new(DeliveryTracker::new());
        let in_flight = InFlight::new(
            record(4),
            PendingAck::ready(DeliveryToken(4), Ok(Watermark(9))),
            Arc::clone(&tracker),
        );
        assert_eq!(tracker.get(DeliveryToken(4)).map(|r| r.state), Some(DeliveryState::Pending));

        let done = in_flight.wait().await.unwrap();
        assert_eq!(done.state, DeliveryState::Acknowledged);
        assert_eq!(done.watermark, Some(Watermark(9)));
        assert_eq!(tracker.in_flight(), 0);
    }
}
