//! Prometheus metrics for the producer

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec};

const LABEL_TOPIC: &str = "topic";

/// Messages acknowledged by the bus
static PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_producer_published_total",
        "Total messages acknowledged by the bus",
        &[LABEL_TOPIC]
    )
    .expect("Failed to register published_total metric")
});

/// Payload bytes handed to the bus (after compression)
static BYTES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_producer_bytes_total",
        "Total payload bytes published",
        &[LABEL_TOPIC]
    )
    .expect("Failed to register bytes_total metric")
});

/// Publish attempts that failed and were retried
static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_producer_retries_total",
        "Total publish retries",
        &[LABEL_TOPIC]
    )
    .expect("Failed to register retries_total metric")
});

/// Messages whose retries were exhausted
static DELIVERY_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "finstream_producer_delivery_failures_total",
        "Total messages that could not be delivered",
        &[LABEL_TOPIC]
    )
    .expect("Failed to register delivery_failures_total metric")
});

static IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "finstream_producer_in_flight",
        "Publishes awaiting acknowledgment",
        &[LABEL_TOPIC]
    )
    .expect("Failed to register in_flight metric")
});

/// Handle for recording metrics for one topic
#[derive(Clone)]
pub struct ProducerMetrics {
    topic: String,
}

impl ProducerMetrics {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }

    pub fn inc_published(&self, bytes: usize) {
        PUBLISHED_TOTAL.with_label_values(&[&self.topic]).inc();
        BYTES_TOTAL
            .with_label_values(&[&self.topic])
            .inc_by(bytes as u64);
    }

    pub fn inc_retry(&self) {
        RETRIES_TOTAL.with_label_values(&[&self.topic]).inc();
    }

    pub fn inc_delivery_failure(&self) {
        DELIVERY_FAILURES_TOTAL.with_label_values(&[&self.topic]).inc();
    }

    pub fn set_in_flight(&self, count: usize) {
        IN_FLIGHT.with_label_values(&[&self.topic]).set(count as i64);
    }

    pub fn get_published(&self) -> u64 {
        PUBLISHED_TOTAL.with_label_values(&[&self.topic]).get()
    }

    pub fn get_retries(&self) -> u64 {
        RETRIES_TOTAL.with_label_values(&[&self.topic]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_metrics() {
        let metrics = ProducerMetrics::new("metrics-test-topic");
        metrics.inc_published(512);
        metrics.inc_published(256);
        metrics.inc_retry();
        metrics.inc_delivery_failure();
        metrics.set_in_flight(3);

        assert_eq!(metrics.get_published(), 2);
        assert_eq!(metrics.get_retries(), 1);
    }
}
