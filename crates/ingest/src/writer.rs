//! Maps batches onto table rows and commits them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use finstream_middleware::Watermark;
use finstream_model::{AnalysisMessage, DataItem, InstrumentItem, Nullable};
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::error::IngestError;
use crate::table::{CommitId, Table, TableRow, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    pub commit_id: CommitId,
    pub rows_written: usize,
    pub rows_skipped: usize,
}

fn group_json<T: Serialize>(value: &Nullable<T>) -> Result<Option<String>, IngestError> {
    if value.is_absent() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(value)?))
}

fn instrument_groups(item: &InstrumentItem) -> Result<BTreeMap<String, String>, IngestError> {
    let columns = [
        ("instrumentreference", group_json(&item.instrumentreference)?),
        ("instrumentriskmetric", group_json(&item.instrumentriskmetric)?),
        ("instrumentcashflow", group_json(&item.instrumentcashflow)?),
        ("instrumenttimebucketmeasures", group_json(&item.instrumenttimebucketmeasures)?),
        ("instrumenterror", group_json(&item.instrumenterror)?),
        ("accounttimebucketmeasures", group_json(&item.accounttimebucketmeasures)?),
        ("accountcashflow", group_json(&item.accountcashflow)?),
    ];
    Ok(columns
        .into_iter()
        .filter_map(|(name, json)| json.map(|j| (name.to_string(), j)))
        .collect())
}

/// Flatten every data item of `message` into one row, keyed by its position
pub fn flatten(
    message: &AnalysisMessage,
    watermark: Watermark,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<TableRow>, IngestError> {
    let mut rows = Vec::with_capacity(message.data().len());
    for (index, item) in message.data().iter().enumerate() {
        let DataItem::Instrument(instrument) = item;
        let errors = instrument.errors();
        rows.push(TableRow {
            jobidentifier: message.job_identifier().to_string(),
            analysisidentifier: message.analysis_identifier().to_string(),
            item_index: index as u32,
            item_type: item.type_name().to_string(),
            instrumentidentifier: item.instrument_identifier().map(str::to_string),
            has_errors: !errors.is_empty(),
            error_count: errors.len() as u32,
            max_error_severity: errors
                .iter()
                .max_by_key(|e| e.severity_rank())
                .map(|e| e.severity.clone()),
            groups: instrument_groups(instrument)?,
            source_watermark: watermark.value(),
            ingested_at,
        });
    }
    Ok(rows)
}

/// Commits batches into one table
pub struct TableWriter {
    table: Arc<dyn Table>,
    table_id: String,
    schema: TableSchema,
}

impl TableWriter {
    /// Create the table if needed, evolving it to the current row schema
    pub async fn open(table: Arc<dyn Table>, table_id: impl Into<String>) -> Result<Self, IngestError> {
        let table_id = table_id.into();
        let schema = table.create_if_absent(&table_id, &TableSchema::current()).await?;
        info!(
            table = %table_id,
            schema_version = schema.version,
            columns = schema.columns.len(),
            "Table writer ready"
        );
        Ok(Self {
            table,
            table_id,
            schema,
        })
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn schema_version(&self) -> u64 {
        self.schema.version
    }

    pub fn table(&self) -> &Arc<dyn Table> {
        &self.table
    }

    /// Commit every item of the batch. Items already present are skipped,
    /// so replaying a committed batch changes nothing.
    pub async fn apply_batch(&self, batch: &Batch) -> Result<CommitResult, IngestError> {
        let ingested_at = Utc::now();
        let mut rows = Vec::with_capacity(batch.item_count());
        for received in &batch.messages {
            rows.extend(flatten(&received.message, received.watermark, ingested_at)?);
        }

        let outcome = self.table.append_or_merge_batch(&self.table_id, rows).await?;
        debug!(
            table = %self.table_id,
            subscription = %batch.subscription_id,
            commit = %outcome.commit_id,
            rows = outcome.inserted,
            skipped = outcome.skipped,
            watermark = batch.watermark.value(),
            "Applied batch"
        );
        Ok(CommitResult {
            commit_id: outcome.commit_id,
            rows_written: outcome.inserted,
            rows_skipped: outcome.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ReceivedMessage;
    use crate::table::InMemoryTable;
    use finstream_model::{InstrumentError, InstrumentReference};
    use serde_json::json;
    use tokio::time::Instant;

    fn message(job: &str) -> AnalysisMessage {
        let errors = DataItem::Instrument(InstrumentItem {
            instrumenterror: Nullable::Value(vec![
                InstrumentError::new("Bond_1", 1, "high prepayment", "Warning"),
                InstrumentError::new("Bond_1", 7, "missing curve", "Error"),
            ]),
            instrumentcashflow: Nullable::Null,
            ..Default::default()
        });
        let reference = DataItem::Instrument(InstrumentItem {
            instrumentreference: Nullable::Value(InstrumentReference::new("Bond_2")),
            accountcashflow: Nullable::Value(json!({"rows": []})),
            ..Default::default()
        });
        AnalysisMessage::new(job, "an-1", vec![errors, reference]).unwrap()
    }

    fn batch(messages: Vec<(u64, AnalysisMessage)>) -> Batch {
        let watermark = Watermark(messages.iter().map(|(w, _)| *w).max().unwrap_or(0));
        Batch {
            subscription_id: "sub".to_string(),
            messages: messages
                .into_iter()
                .map(|(w, message)| ReceivedMessage {
                    watermark: Watermark(w),
                    key: "job-1".to_string(),
                    message,
                })
                .collect(),
            watermark,
            first_arrival: Instant::now(),
        }
    }

    #[test]
    fn test_flatten_rows() {
        let rows = flatten(&message("job-1"), Watermark(9), Utc::now()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.item_index, 0);
        assert!(first.has_errors);
        assert_eq!(first.error_count, 2);
        assert_eq!(first.max_error_severity.as_deref(), Some("Error"));
        assert_eq!(first.instrumentidentifier.as_deref(), Some("Bond_1"));
        assert_eq!(first.group("instrumentcashflow"), Some("null"));
        assert_eq!(first.group("instrumentriskmetric"), None);
        assert_eq!(first.source_watermark, 9);

        let second = &rows[1];
        assert!(!second.has_errors);
        assert_eq!(second.max_error_severity, None);
        assert_eq!(second.group("accountcashflow"), Some(r#"{"rows":[]}"#));
        assert!(second.group("instrumentreference").unwrap().contains("Bond_2"));
    }

    #[tokio::test]
    async fn test_apply_batch_twice_is_noop() {
        let table: Arc<dyn Table> = Arc::new(InMemoryTable::new());
        let writer = TableWriter::open(Arc::clone(&table), "analysis").await.unwrap();

        let b = batch(vec![(1, message("job-1")), (2, message("job-2"))]);
        let first = writer.apply_batch(&b).await.unwrap();
        assert_eq!(first.rows_written, 4);

        let replay = writer.apply_batch(&b).await.unwrap();
        assert_eq!(replay.rows_written, 0);
        assert_eq!(replay.rows_skipped, 4);
        assert_eq!(replay.commit_id, first.commit_id);
        assert_eq!(table.scan("analysis").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing() {
        let writer = TableWriter::open(Arc::new(InMemoryTable::new()), "analysis").await.unwrap();
        let result = writer.apply_batch(&batch(vec![])).await.unwrap();
        assert_eq!(result.rows_written, 0);
        assert_eq!(result.commit_id, CommitId(0));
    }
}
