//! Prometheus metrics for ingest consumers

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec};

const LABEL_SUBSCRIPTION: &str = "subscription";

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_messages_total",
        "Total messages received from the bus",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register messages_total metric")
});

/// Redelivered messages skipped as already batched or committed
static DUPLICATES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_duplicates_total",
        "Total redelivered messages skipped",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register duplicates_total metric")
});

static QUARANTINED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_quarantined_total",
        "Total invalid messages quarantined",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register quarantined_total metric")
});

static ROWS_WRITTEN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_rows_written_total",
        "Total table rows inserted",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register rows_written_total metric")
});

static COMMITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_commits_total",
        "Total batches committed",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register commits_total metric")
});

static COMMIT_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_ingest_commit_failures_total",
        "Total failed commit attempts",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register commit_failures_total metric")
});

/// Last checkpointed watermark per subscription
static COMMITTED_WATERMARK: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "finstream_ingest_committed_watermark",
        "Last committed watermark",
        &[LABEL_SUBSCRIPTION]
    )
    .expect("Failed to register committed_watermark metric")
});

/// Handle for recording metrics for one subscription
#[derive(Clone)]
pub struct IngestMetrics {
    subscription: String,
}

impl IngestMetrics {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
        }
    }

    pub fn inc_message(&self) {
        MESSAGES_TOTAL.with_label_values(&[&self.subscription]).inc();
    }

    pub fn inc_duplicate(&self) {
        DUPLICATES_TOTAL.with_label_values(&[&self.subscription]).inc();
    }

    pub fn inc_quarantined(&self) {
        QUARANTINED_TOTAL.with_label_values(&[&self.subscription]).inc();
    }

    pub fn record_commit(&self, rows: usize, watermark: u64) {
        COMMITS_TOTAL.with_label_values(&[&self.subscription]).inc();
        ROWS_WRITTEN_TOTAL
            .with_label_values(&[&self.subscription])
            .inc_by(rows as u64);
        COMMITTED_WATERMARK
            .with_label_values(&[&self.subscription])
            .set(watermark as i64);
    }

    pub fn inc_commit_failure(&self) {
        COMMIT_FAILURES_TOTAL.with_label_values(&[&self.subscription]).inc();
    }

    pub fn get_rows_written(&self) -> u64 {
        ROWS_WRITTEN_TOTAL.with_label_values(&[&self.subscription]).get()
    }

    pub fn get_committed_watermark(&self) -> i64 {
        COMMITTED_WATERMARK.with_label_values(&[&self.subscription]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_metrics() {
        let metrics = IngestMetrics::new("metrics-test-subscription");
        metrics.inc_message();
        metrics.inc_duplicate();
        metrics.inc_quarantined();
        metrics.record_commit(3, 12);
        metrics.record_commit(2, 15);
        metrics.inc_commit_failure();

        assert_eq!(metrics.get_rows_written(), 5);
        assert_eq!(metrics.get_committed_watermark(), 15);
    }
}
