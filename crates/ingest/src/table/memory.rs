use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CommitId, MergeKey, MergeOutcome, Table, TableRow, TableSchema};
use crate::error::IngestError;

struct TableState {
    schema: TableSchema,
    version: u64,
    rows: Vec<TableRow>,
    keys: HashSet<MergeKey>,
}

/// Table held in process memory. A merge holds the write lock for its whole
/// duration, so it is applied entirely or not at all.
#[derive(Default)]
pub struct InMemoryTable {
    tables: RwLock<HashMap<String, TableState>>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table version
    pub async fn version(&self, table_id: &str) -> Option<CommitId> {
        self.tables.read().await.get(table_id).map(|t| CommitId(t.version))
    }
}

fn missing(table_id: &str) -> IngestError {
    IngestError::CommitFailure(format!("table {} does not exist", table_id))
}

#[async_trait]
impl Table for InMemoryTable {
    async fn create_if_absent(&self, table_id: &str, schema: &TableSchema) -> Result<TableSchema, IngestError> {
        let mut tables = self.tables.write().await;
        match tables.get_mut(table_id) {
            Some(state) => {
                let evolved = state.schema.evolve(schema)?;
                if evolved.version != state.schema.version {
                    state.schema = evolved;
                    state.version += 1;
                }
                Ok(state.schema.clone())
            }
            None => {
                tables.insert(
                    table_id.to_string(),
                    TableState {
                        schema: schema.clone(),
                        version: 0,
                        rows: Vec::new(),
                        keys: HashSet::new(),
                    },
                );
                Ok(schema.clone())
            }
        }
    }

    async fn append_or_merge_batch(&self, table_id: &str, rows: Vec<TableRow>) -> Result<MergeOutcome, IngestError> {
        let mut tables = self.tables.write().await;
        let state = tables.get_mut(table_id).ok_or_else(|| missing(table_id))?;

        let total = rows.len();
        let mut batch_keys = HashSet::with_capacity(total);
        let fresh: Vec<TableRow> = rows
            .into_iter()
            .filter(|row| {
                let key = row.merge_key();
                !state.keys.contains(&key) && batch_keys.insert(key)
            })
            .collect();

        let inserted = fresh.len();
        if inserted > 0 {
            state.keys.extend(batch_keys);
            state.rows.extend(fresh);
            state.version += 1;
        }

        Ok(MergeOutcome {
            commit_id: CommitId(state.version),
            inserted,
            skipped: total - inserted,
        })
    }

    async fn scan(&self, table_id: &str) -> Result<Vec<TableRow>, IngestError> {
        let tables = self.tables.read().await;
        let state = tables.get(table_id).ok_or_else(|| missing(table_id))?;
        Ok(state.rows.clone())
    }

    async fn schema(&self, table_id: &str) -> Result<Option<TableSchema>, IngestError> {
        Ok(self.tables.read().await.get(table_id).map(|t| t.schema.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn row(job: &str, index: u32) -> TableRow {
        TableRow {
            jobidentifier: job.to_string(),
            analysisidentifier: "an-1".to_string(),
            item_index: index,
            item_type: "instrument".to_string(),
            instrumentidentifier: Some("Bond_1".to_string()),
            has_errors: false,
            error_count: 0,
            max_error_severity: None,
            groups: BTreeMap::new(),
            source_watermark: 1,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let table = InMemoryTable::new();
        table.create_if_absent("t", &TableSchema::current()).await.unwrap();

        let first = table
            .append_or_merge_batch("t", vec![row("job-1", 0), row("job-1", 1)])
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.commit_id, CommitId(1));

        let replay = table
            .append_or_merge_batch("t", vec![row("job-1", 0), row("job-1", 1)])
            .await
            .unwrap();
        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.skipped, 2);
        assert_eq!(replay.commit_id, CommitId(1));
        assert_eq!(table.scan("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_within_batch() {
        let table = InMemoryTable::new();
        table.create_if_absent("t", &TableSchema::current()).await.unwrap();
        let outcome = table
            .append_or_merge_batch("t", vec![row("job-1", 0), row("job-1", 0), row("job-2", 0)])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let table = InMemoryTable::new();
        assert!(table.append_or_merge_batch("nope", vec![row("job-1", 0)]).await.is_err());
        assert!(table.schema("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_evolves_existing_table() {
        let table = InMemoryTable::new();
        table
            .create_if_absent("t", &TableSchema::with_groups(&["instrumentreference"]))
            .await
            .unwrap();
        table.append_or_merge_batch("t", vec![row("job-1", 0)]).await.unwrap();

        let evolved = table.create_if_absent("t", &TableSchema::current()).await.unwrap();
        assert_eq!(evolved.version, 2);
        let again = table.create_if_absent("t", &TableSchema::current()).await.unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(table.scan("t").await.unwrap().len(), 1);
        assert!(table
            .create_if_absent("t", &TableSchema::with_groups(&[]))
            .await
            .is_err());
    }
}
