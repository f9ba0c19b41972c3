//! Destination table boundary: versioned schema, flattened rows and the
//! atomic insert-when-not-matched merge.

mod memory;
mod parquet_table;

pub use self::memory::InMemoryTable;
pub use self::parquet_table::ParquetTable;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finstream_model::GROUP_NAMES;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Columns every commit merges on
pub const MERGE_KEY: [&str; 3] = ["jobidentifier", "analysisidentifier", "item_index"];

/// Table version produced by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub u64);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MergeKey {
    pub jobidentifier: String,
    pub analysisidentifier: String,
    pub item_index: u32,
}

/// One data item flattened for the table.
///
/// Group columns hold the group's JSON text. A missing entry is SQL NULL
/// (group absent); the text `null` is an explicit null.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub jobidentifier: String,
    pub analysisidentifier: String,
    pub item_index: u32,
    pub item_type: String,
    pub instrumentidentifier: Option<String>,
    pub has_errors: bool,
    pub error_count: u32,
    pub max_error_severity: Option<String>,
    pub groups: BTreeMap<String, String>,
    pub source_watermark: u64,
    pub ingested_at: DateTime<Utc>,
}

impl TableRow {
    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            jobidentifier: self.jobidentifier.clone(),
            analysisidentifier: self.analysisidentifier.clone(),
            item_index: self.item_index,
        }
    }

    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Utf8,
    UInt32,
    UInt64,
    Boolean,
    TimestampMicros,
    /// JSON text of a nested group
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    fn new(name: &str, data_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub version: u64,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Row columns with one group column per known nested group
    pub fn current() -> Self {
        Self::with_groups(&GROUP_NAMES)
    }

    pub fn with_groups(groups: &[&str]) -> Self {
        let mut columns = vec![
            ColumnDef::new("jobidentifier", ColumnType::Utf8, false),
            ColumnDef::new("analysisidentifier", ColumnType::Utf8, false),
            ColumnDef::new("item_index", ColumnType::UInt32, false),
            ColumnDef::new("item_type", ColumnType::Utf8, false),
            ColumnDef::new("instrumentidentifier", ColumnType::Utf8, true),
            ColumnDef::new("has_errors", ColumnType::Boolean, false),
            ColumnDef::new("error_count", ColumnType::UInt32, false),
            ColumnDef::new("max_error_severity", ColumnType::Utf8, true),
        ];
        columns.extend(groups.iter().map(|g| ColumnDef::new(g, ColumnType::Json, true)));
        columns.push(ColumnDef::new("source_watermark", ColumnType::UInt64, false));
        columns.push(ColumnDef::new("ingested_at", ColumnType::TimestampMicros, false));
        Self { version: 1, columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn group_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.data_type == ColumnType::Json)
            .map(|c| c.name.as_str())
    }

    /// Same columns, ignoring the version stamp
    pub fn same_columns(&self, other: &TableSchema) -> bool {
        self.columns == other.columns
    }

    /// Move to `next` if it only adds nullable columns.
    ///
    /// Returns `self` unchanged when nothing is added; otherwise the
    /// evolved schema carries the next version. Dropping, retyping or
    /// tightening a column needs an explicit migration.
    pub fn evolve(&self, next: &TableSchema) -> Result<TableSchema, IngestError> {
        if self.same_columns(next) {
            return Ok(self.clone());
        }

        for existing in &self.columns {
            match next.column(&existing.name) {
                None => {
                    return Err(IngestError::SchemaEvolution(format!(
                        "column {} would be dropped",
                        existing.name
                    )))
                }
                Some(c) if c.data_type != existing.data_type => {
                    return Err(IngestError::SchemaEvolution(format!(
                        "column {} would change type from {:?} to {:?}",
                        existing.name, existing.data_type, c.data_type
                    )))
                }
                Some(c) if existing.nullable && !c.nullable => {
                    return Err(IngestError::SchemaEvolution(format!(
                        "column {} would become required",
                        existing.name
                    )))
                }
                Some(_) => {}
            }
        }

        let mut columns = self.columns.clone();
        for added in &next.columns {
            if self.column(&added.name).is_some() {
                continue;
            }
            if !added.nullable {
                return Err(IngestError::SchemaEvolution(format!(
                    "added column {} must be nullable",
                    added.name
                )));
            }
            columns.push(added.clone());
        }
        if columns.len() == self.columns.len() {
            return Ok(self.clone());
        }

        Ok(TableSchema {
            version: self.version + 1,
            columns,
        })
    }
}

/// Result of merging one batch of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Table version after the merge; unchanged when nothing was inserted
    pub commit_id: CommitId,
    pub inserted: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait Table: Send + Sync {
    /// Create the table, or evolve an existing one towards `schema`.
    /// Returns the schema in effect.
    async fn create_if_absent(&self, table_id: &str, schema: &TableSchema) -> Result<TableSchema, IngestError>;

    /// Atomically insert the rows whose [`MERGE_KEY`] is not yet present.
    /// Rows already present (or repeated within `rows`) are skipped.
    async fn append_or_merge_batch(&self, table_id: &str, rows: Vec<TableRow>) -> Result<MergeOutcome, IngestError>;

    /// Every committed row, in commit order
    async fn scan(&self, table_id: &str) -> Result<Vec<TableRow>, IngestError>;

    async fn schema(&self, table_id: &str) -> Result<Option<TableSchema>, IngestError>;
}
