use std::fmt;

use finstream_model::AnalysisMessage;

/// Bus partition key. Messages sharing a key are delivered in publish order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Same key for every message about one instrument or account
    pub fn for_entity(entity_id: &str) -> Self {
        Self(entity_id.to_string())
    }

    /// Key by job identifier
    pub fn for_job(message: &AnalysisMessage) -> Self {
        Self(message.job_identifier().to_string())
    }

    /// Entity key from the first instrument (then account) referenced by the
    /// message, falling back to the job identifier
    pub fn for_message_entity(message: &AnalysisMessage) -> Self {
        message
            .first_instrument()
            .or_else(|| message.first_account())
            .map(Self::for_entity)
            .unwrap_or_else(|| Self::for_job(message))
    }

    /// One of `partitions` spread keys, chosen by a running counter
    pub fn round_robin(counter: usize, partitions: usize) -> Self {
        Self(format!("rr-{}", counter % partitions.max(1)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
