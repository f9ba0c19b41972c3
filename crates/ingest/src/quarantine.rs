//! Invalid messages set aside for manual inspection and replay.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use finstream_middleware::Watermark;
use finstream_model::SchemaViolation;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub subscription_id: String,
    pub watermark: u64,
    pub partition_key: String,
    /// Base64 of the payload as it could best be recovered
    pub raw_payload: String,
    pub error_path: String,
    pub error_reason: String,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineRecord {
    pub fn new(
        subscription_id: impl Into<String>,
        watermark: Watermark,
        partition_key: impl Into<String>,
        payload: &[u8],
        violation: &SchemaViolation,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            watermark: watermark.value(),
            partition_key: partition_key.into(),
            raw_payload: STANDARD.encode(payload),
            error_path: violation.path.clone(),
            error_reason: violation.reason.clone(),
            quarantined_at: Utc::now(),
        }
    }

    /// Decoded payload bytes
    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.raw_payload)
    }
}

#[async_trait]
pub trait QuarantineSink: Send + Sync {
    async fn quarantine(&self, record: QuarantineRecord) -> Result<(), IngestError>;
}

#[derive(Default)]
pub struct InMemoryQuarantine {
    records: Mutex<Vec<QuarantineRecord>>,
}

impl InMemoryQuarantine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<QuarantineRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl QuarantineSink for InMemoryQuarantine {
    async fn quarantine(&self, record: QuarantineRecord) -> Result<(), IngestError> {
        log_quarantined(&record);
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// One JSON line per record in `<dir>/<subscription>.jsonl`
pub struct JsonlQuarantine {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonlQuarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, subscription_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", subscription_id))
    }

    /// Read back every record of a quarantine file
    pub fn read(path: &Path) -> Result<Vec<QuarantineRecord>, IngestError> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(IngestError::from))
            .collect()
    }
}

#[async_trait]
impl QuarantineSink for JsonlQuarantine {
    async fn quarantine(&self, record: QuarantineRecord) -> Result<(), IngestError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.subscription_id))?;
        file.write_all(&line)?;
        file.sync_data()?;
        log_quarantined(&record);
        Ok(())
    }
}

fn log_quarantined(record: &QuarantineRecord) {
    warn!(
        subscription = %record.subscription_id,
        watermark = record.watermark,
        key = %record.partition_key,
        path = %record.error_path,
        reason = %record.error_reason,
        "Quarantined invalid message"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(watermark: u64) -> QuarantineRecord {
        QuarantineRecord::new(
            "sub-a",
            Watermark(watermark),
            "job-1",
            br#"{"jobidentifier":"","analysisidentifier":"an-1","data":[]}"#,
            &SchemaViolation::new("jobidentifier", "identifier must not be empty"),
        )
    }

    #[test]
    fn test_payload_round_trip() {
        let r = record(3);
        assert_eq!(r.error_path, "jobidentifier");
        assert!(r.payload().unwrap().starts_with(b"{\"jobidentifier\""));
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = InMemoryQuarantine::new();
        sink.quarantine(record(1)).await.unwrap();
        sink.quarantine(record(2)).await.unwrap();
        let records = sink.records().await;
        assert_eq!(records.iter().map(|r| r.watermark).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlQuarantine::new(dir.path().join("quarantine"));
        sink.quarantine(record(4)).await.unwrap();
        sink.quarantine(record(5)).await.unwrap();

        let records = JsonlQuarantine::read(&sink.path_for("sub-a")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].watermark, 5);
        assert_eq!(records[1].payload().unwrap(), record(5).payload().unwrap());
    }
}
