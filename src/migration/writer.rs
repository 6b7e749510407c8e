use chrono::DateTime;
use std::collections::HashMap;
use tracing::debug;

use crate::config::MigrationConfig;
use crate::database::{RelationalStore, StoredRow};
use crate::error::MigrationError;
use crate::index::{submit_bulk, BulkOperation, BulkSummary, SearchIndex};
use crate::migration::batch::TableBatch;
use crate::types::{Action, MutationRecord};

/// How upserts are versioned in the search index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Use each record's `updatedAt`; records without one get the run clock
    UpdatedAt { run_clock: i64 },
    /// Every upsert of the run carries the same version
    RunClock(i64),
}

impl VersionPolicy {
    /// Pull mode: versions follow the documents' own timestamps
    pub fn pull(run_clock: i64) -> Self {
        VersionPolicy::UpdatedAt { run_clock }
    }

    /// Push mode: one version for the whole run
    pub fn push(run_clock: i64) -> Self {
        VersionPolicy::RunClock(run_clock)
    }

    pub fn version_for(&self, record: &MutationRecord) -> Result<i64, MigrationError> {
        match self {
            VersionPolicy::RunClock(clock) => Ok(*clock),
            VersionPolicy::UpdatedAt { run_clock } => match record.updated_at.as_deref() {
                None => Ok(*run_clock),
                Some(raw) => parse_version(raw)
                    .map_err(|reason| MigrationError::transform(record.id.as_str(), reason)),
            },
        }
    }
}

/// RFC 3339 timestamp to nanoseconds since the epoch
pub fn parse_version(raw: &str) -> Result<i64, String> {
    let time = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| format!("updatedAt {:?} is not an RFC 3339 timestamp: {}", raw, e))?;
    time.timestamp_nanos_opt()
        .ok_or_else(|| format!("updatedAt {:?} is out of range", raw))
}

/// What one table batch did to both stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableWriteSummary {
    pub deleted_ids: usize,
    pub inserted_rows: usize,
    pub bulk: BulkSummary,
}

/// Applies a table batch to the relational store and then the search index.
///
/// Both stores receive only the last action per id in a batch. Across batches of the same run a
/// revisited document gets a version strictly above the one this writer last gave it, so the
/// index never rejects a later write that the relational store has already applied.
pub struct DualStoreWriter<'a> {
    store: &'a dyn RelationalStore,
    index: &'a dyn SearchIndex,
    config: &'a MigrationConfig,
    versions: VersionPolicy,
    issued: HashMap<(String, String), i64>,
}

impl<'a> DualStoreWriter<'a> {
    pub fn new(
        store: &'a dyn RelationalStore,
        index: &'a dyn SearchIndex,
        config: &'a MigrationConfig,
        versions: VersionPolicy,
    ) -> Self {
        Self {
            store,
            index,
            config,
            versions,
            issued: HashMap::new(),
        }
    }

    /// The last record of each id, in first-seen id order
    fn last_actions(batch: &TableBatch) -> Vec<&MutationRecord> {
        let mut last: HashMap<&str, &MutationRecord> = HashMap::new();
        for record in &batch.records {
            last.insert(record.id.as_str(), record);
        }
        batch
            .ids()
            .into_iter()
            .filter_map(|id| last.get(id.as_str()).copied())
            .collect()
    }

    /// Rows that should exist once the batch is applied: the last action per id wins
    pub fn final_rows(batch: &TableBatch) -> Vec<StoredRow> {
        Self::last_actions(batch)
            .into_iter()
            .filter(|record| record.action == Action::Upsert)
            .map(|record| StoredRow {
                id: record.id.clone(),
                parent: record.parent.clone().unwrap_or_default(),
                data: record.data.clone(),
            })
            .collect()
    }

    fn next_version(&self, index_type: &str, record: &MutationRecord) -> Result<i64, MigrationError> {
        let version = self.versions.version_for(record)?;
        let key = (index_type.to_string(), record.id.clone());
        Ok(match self.issued.get(&key) {
            Some(&previous) if previous >= version => {
                debug!(
                    "{}/{} revisited in this run, version {} raised to {}",
                    index_type,
                    record.id,
                    version,
                    previous + 1
                );
                previous + 1
            }
            _ => version,
        })
    }

    /// One bulk item per id, carrying the same last action as the relational rows
    pub fn bulk_operations(&self, batch: &TableBatch) -> Result<Vec<BulkOperation>, MigrationError> {
        let index_type = self.config.index_type(&batch.table);
        Self::last_actions(batch)
            .into_iter()
            .map(|record| -> Result<BulkOperation, MigrationError> {
                Ok(match record.action {
                    Action::Delete => BulkOperation::Delete {
                        index_type: index_type.to_string(),
                        id: record.id.clone(),
                    },
                    Action::Upsert => BulkOperation::Index {
                        index_type: index_type.to_string(),
                        id: record.id.clone(),
                        version: self.next_version(index_type, record)?,
                        routing: record.parent.clone(),
                        document: record.data.clone(),
                    },
                })
            })
            .collect()
    }

    fn remember(&mut self, operations: &[BulkOperation]) {
        for operation in operations {
            match operation {
                BulkOperation::Index {
                    index_type,
                    id,
                    version,
                    ..
                } => {
                    self.issued.insert((index_type.clone(), id.clone()), *version);
                }
                // an unversioned delete leaves a tombstone one above the stored version
                BulkOperation::Delete { index_type, id } => {
                    if let Some(version) = self.issued.get_mut(&(index_type.clone(), id.clone())) {
                        *version += 1;
                    }
                }
            }
        }
    }

    /// Replace the batch's rows in one transaction, then submit its bulk request.
    ///
    /// Bulk items are built first so malformed input fails before anything is written.
    pub async fn write_table(&mut self, batch: &TableBatch) -> Result<TableWriteSummary, MigrationError> {
        let operations = self.bulk_operations(batch)?;
        let ids = batch.ids();
        let rows = Self::final_rows(batch);

        self.store.replace_rows(&batch.table, &ids, &rows).await?;
        let bulk = submit_bulk(self.index, &operations).await?;
        self.remember(&operations);

        debug!(
            "Wrote {}: {} id(s) replaced, {} row(s) inserted, {} bulk item(s)",
            batch.table,
            ids.len(),
            rows.len(),
            bulk.items
        );
        Ok(TableWriteSummary {
            deleted_ids: ids.len(),
            inserted_rows: rows.len(),
            bulk,
        })
    }
}
