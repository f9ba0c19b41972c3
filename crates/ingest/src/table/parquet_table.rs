//! Local versioned table: one Parquet file per commit plus a JSON commit log.
//!
//! Layout under `<root>/<table_id>/`:
//! - `_log/{version:020}.json`: one entry per version, published by hard-linking
//!   a fully written temp file, so a version can be claimed exactly once
//! - `data/part-{version:020}-{uuid}.parquet`: rows added by that version
//!
//! Schema changes are log entries too. The set of committed merge keys is
//! rebuilt by replaying the log when a table is first touched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ColumnDef, ColumnType, CommitId, MergeKey, MergeOutcome, Table, TableRow, TableSchema};
use crate::error::IngestError;

const LOG_DIR: &str = "_log";
const DATA_DIR: &str = "data";

#[derive(Debug, Serialize, Deserialize)]
struct CommitEntry {
    version: u64,
    committed_at: DateTime<Utc>,
    action: CommitAction,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CommitAction {
    Schema { schema: TableSchema },
    Add { file: String, rows: usize, keys: Vec<MergeKey> },
}

struct TableState {
    version: u64,
    schema: TableSchema,
    keys: HashSet<MergeKey>,
    files: Vec<String>,
}

pub struct ParquetTable {
    root: PathBuf,
    states: Mutex<HashMap<String, TableState>>,
}

impl ParquetTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn table_dir(&self, table_id: &str) -> Result<PathBuf, IngestError> {
        let valid = !table_id.is_empty()
            && table_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IngestError::Config(format!("invalid table id: {:?}", table_id)));
        }
        Ok(self.root.join(table_id))
    }

    /// Current table version, replaying the log if needed
    pub async fn version(&self, table_id: &str) -> Result<Option<CommitId>, IngestError> {
        let dir = self.table_dir(table_id)?;
        let mut states = self.states.lock().await;
        Ok(loaded(&mut states, &dir, table_id)?.map(|s| CommitId(s.version)))
    }
}

fn ts_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC")))
}

fn missing(table_id: &str) -> IngestError {
    IngestError::CommitFailure(format!("table {} does not exist", table_id))
}

/// Cached state for a table, loading it from the log on first use
fn loaded<'a>(
    states: &'a mut HashMap<String, TableState>,
    dir: &Path,
    table_id: &str,
) -> Result<Option<&'a mut TableState>, IngestError> {
    if !states.contains_key(table_id) {
        match replay(dir)? {
            Some(state) => {
                info!(
                    table = %table_id,
                    version = state.version,
                    files = state.files.len(),
                    keys = state.keys.len(),
                    "Opened table"
                );
                states.insert(table_id.to_string(), state);
            }
            None => return Ok(None),
        }
    }
    Ok(states.get_mut(table_id))
}

fn replay(dir: &Path) -> Result<Option<TableState>, IngestError> {
    let log_dir = dir.join(LOG_DIR);
    let entries = match fs::read_dir(&log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            names.push(name);
        }
    }
    // Zero-padded versions sort lexically
    names.sort();

    let mut state: Option<TableState> = None;
    for name in names {
        let entry: CommitEntry = serde_json::from_slice(&fs::read(log_dir.join(&name))?)?;
        let expected = state.as_ref().map_or(0, |s| s.version + 1);
        if entry.version != expected {
            return Err(IngestError::CommitFailure(format!(
                "commit log of {} skips from version {} to {}",
                dir.display(),
                expected,
                entry.version
            )));
        }
        state = Some(match (entry.action, state.take()) {
            (CommitAction::Schema { schema }, None) => TableState {
                version: entry.version,
                schema,
                keys: HashSet::new(),
                files: Vec::new(),
            },
            (CommitAction::Schema { schema }, Some(mut s)) => {
                s.version = entry.version;
                s.schema = schema;
                s
            }
            (CommitAction::Add { file, keys, .. }, Some(mut s)) => {
                s.version = entry.version;
                s.keys.extend(keys);
                s.files.push(file);
                s
            }
            (CommitAction::Add { .. }, None) => {
                return Err(IngestError::CommitFailure(format!(
                    "commit log of {} adds data before a schema",
                    dir.display()
                )))
            }
        });
    }
    Ok(state)
}

/// Publish a log entry. Fails if the version was already claimed.
fn write_entry(dir: &Path, entry: &CommitEntry) -> Result<(), IngestError> {
    let log_dir = dir.join(LOG_DIR);
    let tmp_path = log_dir.join(format!(".{:020}-{}.tmp", entry.version, Uuid::new_v4().simple()));
    let final_path = log_dir.join(format!("{:020}.json", entry.version));

    let mut file = File::create(&tmp_path)?;
    file.write_all(&serde_json::to_vec_pretty(entry)?)?;
    file.sync_all()?;
    drop(file);

    let linked = fs::hard_link(&tmp_path, &final_path);
    let _ = fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(IngestError::CommitFailure(format!(
            "version {} of {} was committed by another writer",
            entry.version,
            dir.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn arrow_type(data_type: ColumnType) -> DataType {
    match data_type {
        ColumnType::Utf8 | ColumnType::Json => DataType::Utf8,
        ColumnType::UInt32 => DataType::UInt32,
        ColumnType::UInt64 => DataType::UInt64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::TimestampMicros => ts_type(),
    }
}

fn arrow_schema(schema: &TableSchema) -> Schema {
    Schema::new(
        schema
            .columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.data_type), c.nullable))
            .collect::<Vec<_>>(),
    )
}

fn column_array(column: &ColumnDef, rows: &[TableRow]) -> Result<ArrayRef, ArrowError> {
    let array: ArrayRef = match column.name.as_str() {
        "jobidentifier" => Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.jobidentifier))),
        "analysisidentifier" => Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.analysisidentifier))),
        "item_type" => Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.item_type))),
        "item_index" => Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.item_index))),
        "error_count" => Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.error_count))),
        "source_watermark" => Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.source_watermark))),
        "has_errors" => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                builder.append_value(row.has_errors);
            }
            Arc::new(builder.finish())
        }
        "instrumentidentifier" => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(row.instrumentidentifier.as_deref());
            }
            Arc::new(builder.finish())
        }
        "max_error_severity" => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(row.max_error_severity.as_deref());
            }
            Arc::new(builder.finish())
        }
        "ingested_at" => Arc::new(
            TimestampMicrosecondArray::from_iter_values(rows.iter().map(|r| r.ingested_at.timestamp_micros()))
                .with_timezone("UTC"),
        ),
        group if column.data_type == ColumnType::Json => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(row.group(group));
            }
            Arc::new(builder.finish())
        }
        other => {
            return Err(ArrowError::SchemaError(format!("no row field for column {}", other)));
        }
    };
    Ok(array)
}

fn to_record_batch(schema: &TableSchema, rows: &[TableRow]) -> Result<RecordBatch, ArrowError> {
    let columns = schema
        .columns
        .iter()
        .map(|c| column_array(c, rows))
        .collect::<Result<Vec<_>, _>>()?;
    RecordBatch::try_new(Arc::new(arrow_schema(schema)), columns)
}

fn write_data_file(path: &Path, schema: &TableSchema, rows: &[TableRow]) -> Result<u64, IngestError> {
    let batch = to_record_batch(schema, rows)?;
    let tmp_path = path.with_extension("parquet.tmp");

    let file = File::create(&tmp_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_created_by("finstream-ingest".to_string())
        .set_key_value_metadata(Some(vec![KeyValue::new(
            "finstream.schema_version".to_string(),
            schema.version.to_string(),
        )]))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    fs::rename(&tmp_path, path)?;
    Ok(fs::metadata(path)?.len())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, IngestError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| ArrowError::SchemaError(format!("column {} missing or mistyped", name)).into())
}

fn optional_string(array: &StringArray, i: usize) -> Option<String> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i).to_string())
    }
}

fn rows_from_batch(batch: &RecordBatch, schema: &TableSchema) -> Result<Vec<TableRow>, IngestError> {
    let jobs = column::<StringArray>(batch, "jobidentifier")?;
    let analyses = column::<StringArray>(batch, "analysisidentifier")?;
    let indexes = column::<UInt32Array>(batch, "item_index")?;
    let item_types = column::<StringArray>(batch, "item_type")?;
    let instruments = column::<StringArray>(batch, "instrumentidentifier")?;
    let has_errors = column::<BooleanArray>(batch, "has_errors")?;
    let error_counts = column::<UInt32Array>(batch, "error_count")?;
    let severities = column::<StringArray>(batch, "max_error_severity")?;
    let watermarks = column::<UInt64Array>(batch, "source_watermark")?;
    let ingested = column::<TimestampMicrosecondArray>(batch, "ingested_at")?;

    // Files written before a group column was added simply lack it
    let groups: Vec<(&str, Option<&StringArray>)> = schema
        .group_columns()
        .map(|g| (g, column::<StringArray>(batch, g).ok()))
        .collect();

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let micros = ingested.value(i);
        let ingested_at = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| ArrowError::ComputeError(format!("timestamp out of range: {}", micros)))?;

        let mut row_groups = BTreeMap::new();
        for &(name, array) in &groups {
            if let Some(value) = array.and_then(|a| optional_string(a, i)) {
                row_groups.insert(name.to_string(), value);
            }
        }

        rows.push(TableRow {
            jobidentifier: jobs.value(i).to_string(),
            analysisidentifier: analyses.value(i).to_string(),
            item_index: indexes.value(i),
            item_type: item_types.value(i).to_string(),
            instrumentidentifier: optional_string(instruments, i),
            has_errors: has_errors.value(i),
            error_count: error_counts.value(i),
            max_error_severity: optional_string(severities, i),
            groups: row_groups,
            source_watermark: watermarks.value(i),
            ingested_at,
        });
    }
    Ok(rows)
}

fn read_data_file(path: &Path, schema: &TableSchema) -> Result<Vec<TableRow>, IngestError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(rows_from_batch(&batch?, schema)?);
    }
    Ok(rows)
}

fn commit_rows(dir: &Path, table_id: &str, state: &mut TableState, rows: Vec<TableRow>) -> Result<MergeOutcome, IngestError> {
    let total = rows.len();
    let mut batch_keys = HashSet::with_capacity(total);
    let fresh: Vec<TableRow> = rows
        .into_iter()
        .filter(|row| {
            let key = row.merge_key();
            !state.keys.contains(&key) && batch_keys.insert(key)
        })
        .collect();

    if fresh.is_empty() {
        debug!(table = %table_id, skipped = total, "Nothing new to merge");
        return Ok(MergeOutcome {
            commit_id: CommitId(state.version),
            inserted: 0,
            skipped: total,
        });
    }

    let version = state.version + 1;
    let file_name = format!("part-{:020}-{}.parquet", version, Uuid::new_v4().simple());
    let data_path = dir.join(DATA_DIR).join(&file_name);
    let bytes = write_data_file(&data_path, &state.schema, &fresh)?;

    let entry = CommitEntry {
        version,
        committed_at: Utc::now(),
        action: CommitAction::Add {
            file: file_name.clone(),
            rows: fresh.len(),
            keys: batch_keys.iter().cloned().collect(),
        },
    };
    if let Err(e) = write_entry(dir, &entry) {
        let _ = fs::remove_file(&data_path);
        return Err(e);
    }

    info!(
        table = %table_id,
        version = version,
        file = %file_name,
        rows = fresh.len(),
        skipped = total - fresh.len(),
        bytes = bytes,
        "Committed table version"
    );

    state.version = version;
    state.keys.extend(batch_keys);
    state.files.push(file_name);

    Ok(MergeOutcome {
        commit_id: CommitId(version),
        inserted: fresh.len(),
        skipped: total - fresh.len(),
    })
}

#[async_trait]
impl Table for ParquetTable {
    async fn create_if_absent(&self, table_id: &str, schema: &TableSchema) -> Result<TableSchema, IngestError> {
        let dir = self.table_dir(table_id)?;
        let mut states = self.states.lock().await;
        fs::create_dir_all(dir.join(LOG_DIR))?;
        fs::create_dir_all(dir.join(DATA_DIR))?;

        if let Some(state) = loaded(&mut states, &dir, table_id)? {
            let evolved = state.schema.evolve(schema)?;
            if evolved.version == state.schema.version {
                return Ok(state.schema.clone());
            }
            let entry = CommitEntry {
                version: state.version + 1,
                committed_at: Utc::now(),
                action: CommitAction::Schema { schema: evolved.clone() },
            };
            write_entry(&dir, &entry)?;
            info!(
                table = %table_id,
                version = entry.version,
                schema_version = evolved.version,
                "Evolved table schema"
            );
            state.version = entry.version;
            state.schema = evolved.clone();
            return Ok(evolved);
        }

        let entry = CommitEntry {
            version: 0,
            committed_at: Utc::now(),
            action: CommitAction::Schema { schema: schema.clone() },
        };
        write_entry(&dir, &entry)?;
        info!(table = %table_id, path = %dir.display(), "Created table");
        states.insert(
            table_id.to_string(),
            TableState {
                version: 0,
                schema: schema.clone(),
                keys: HashSet::new(),
                files: Vec::new(),
            },
        );
        Ok(schema.clone())
    }

    async fn append_or_merge_batch(&self, table_id: &str, rows: Vec<TableRow>) -> Result<MergeOutcome, IngestError> {
        let dir = self.table_dir(table_id)?;
        let mut states = self.states.lock().await;
        let state = loaded(&mut states, &dir, table_id)?.ok_or_else(|| missing(table_id))?;

        let result = commit_rows(&dir, table_id, state, rows);
        if let Err(e) = &result {
            // Another writer may have advanced the log; reload on next use
            warn!(table = %table_id, error = %e, "Merge failed, dropping cached table state");
            states.remove(table_id);
        }
        result
    }

    async fn scan(&self, table_id: &str) -> Result<Vec<TableRow>, IngestError> {
        let dir = self.table_dir(table_id)?;
        let mut states = self.states.lock().await;
        let state = loaded(&mut states, &dir, table_id)?.ok_or_else(|| missing(table_id))?;

        let mut rows = Vec::new();
        for file in &state.files {
            rows.extend(read_data_file(&dir.join(DATA_DIR).join(file), &state.schema)?);
        }
        Ok(rows)
    }

    async fn schema(&self, table_id: &str) -> Result<Option<TableSchema>, IngestError> {
        let dir = self.table_dir(table_id)?;
        let mut states = self.states.lock().await;
        Ok(loaded(&mut states, &dir, table_id)?.map(|s| s.schema.clone()))
    }
}
