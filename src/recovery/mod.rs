//! Compensating recovery from a backup file pair.
//!
//! Two phases, always in this order:
//!
//! 1. Every id in the change index is deleted from the relational table and the search index.
//!    This removes rows the migration created as well as migrated versions of existing ones.
//! 2. Every pre-image in the origin log is reinserted into both stores, in batches.
//!
//! Both phases are idempotent, so an interrupted recovery can simply be run again.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::backup::{BackupLogEntry, BackupReader};
use crate::config::MigrationConfig;
use crate::database::{RelationalStore, StoredRow};
use crate::error::MigrationError;
use crate::index::{submit_bulk, BulkOperation, SearchIndex};

/// Pre-images reinserted per flush, counted across tables
pub const REINSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub backup_key: String,
    pub change_entries: usize,
    pub ids_deleted: usize,
    pub rows_deleted: u64,
    pub rows_restored: usize,
    pub reinsert_batches: usize,
    pub version_conflicts: usize,
}

pub struct RecoveryEngine<'a> {
    store: &'a dyn RelationalStore,
    index: &'a dyn SearchIndex,
    config: &'a MigrationConfig,
    /// Version for reinserted documents; newer than anything the migration wrote
    version: i64,
    batch_size: usize,
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(
        store: &'a dyn RelationalStore,
        index: &'a dyn SearchIndex,
        config: &'a MigrationConfig,
        version: i64,
    ) -> Self {
        Self {
            store,
            index,
            config,
            version,
            batch_size: REINSERT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn recover(&self, backup: &BackupReader) -> Result<RecoveryReport, MigrationError> {
        let mut report = RecoveryReport {
            backup_key: backup.key().to_string(),
            ..RecoveryReport::default()
        };
        info!("Recovering backup {}", backup.key());

        self.reverse_changes(backup, &mut report).await?;
        self.reinsert(backup, &mut report).await?;

        info!(
            "Recovery of {} finished: {} id(s) deleted, {} row(s) restored",
            report.backup_key, report.ids_deleted, report.rows_restored
        );
        Ok(report)
    }

    /// Phase 1: delete every id the migration touched, table by table
    pub async fn reverse_changes(
        &self,
        backup: &BackupReader,
        report: &mut RecoveryReport,
    ) -> Result<(), MigrationError> {
        let mut changes = backup.change_index().await?;
        while let Some(entry) = changes.next_entry().await? {
            report.change_entries += 1;
            if entry.ids.is_empty() {
                continue;
            }

            let rows = self.store.delete_rows(&entry.table, &entry.ids).await?;
            let index_type = self.config.index_type(&entry.table);
            let operations: Vec<BulkOperation> = entry
                .ids
                .iter()
                .map(|id| BulkOperation::Delete {
                    index_type: index_type.to_string(),
                    id: id.clone(),
                })
                .collect();
            submit_bulk(self.index, &operations).await?;

            report.ids_deleted += entry.ids.len();
            report.rows_deleted += rows;
            debug!(
                "Deleted {} id(s) from {} ({} row(s) present)",
                entry.ids.len(),
                entry.table,
                rows
            );
        }
        Ok(())
    }

    /// Phase 2: replay pre-images into both stores
    pub async fn reinsert(
        &self,
        backup: &BackupReader,
        report: &mut RecoveryReport,
    ) -> Result<(), MigrationError> {
        let mut log = backup.origin_log().await?;
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut pending = PendingRestore::default();

        while let Some(entry) = log.next_entry().await? {
            if !seen.insert((entry.table.clone(), entry.id.clone())) {
                warn!(
                    "Skipping later pre-image of {} {}; the first one wins",
                    entry.table, entry.id
                );
                continue;
            }
            pending.push(entry);
            if pending.len >= self.batch_size {
                self.restore(std::mem::take(&mut pending), report).await?;
            }
        }
        if pending.len > 0 {
            self.restore(pending, report).await?;
        }
        Ok(())
    }

    async fn restore(
        &self,
        pending: PendingRestore,
        report: &mut RecoveryReport,
    ) -> Result<(), MigrationError> {
        for (table, entries) in pending.tables {
            let rows: Vec<StoredRow> = entries
                .into_iter()
                .map(|entry| StoredRow {
                    id: entry.id,
                    parent: entry.parent,
                    data: entry.data,
                })
                .collect();
            self.store.restore_rows(&table, &rows).await?;

            let index_type = self.config.index_type(&table);
            let operations: Vec<BulkOperation> = rows
                .iter()
                .map(|row| BulkOperation::Index {
                    index_type: index_type.to_string(),
                    id: row.id.clone(),
                    version: self.version,
                    routing: Some(row.parent.clone()).filter(|p| !p.is_empty()),
                    document: row.data.clone(),
                })
                .collect();
            let summary = submit_bulk(self.index, &operations).await?;

            report.rows_restored += rows.len();
            report.version_conflicts += summary.version_conflicts;
        }
        report.reinsert_batches += 1;
        debug!(
            "Reinsert batch {} done, {} row(s) restored so far",
            report.reinsert_batches, report.rows_restored
        );
        Ok(())
    }
}

/// Pre-images grouped by table in first-seen order
#[derive(Default)]
struct PendingRestore {
    tables: Vec<(String, Vec<BackupLogEntry>)>,
    len: usize,
}

impl PendingRestore {
    fn push(&mut self, entry: BackupLogEntry) {
        match self.tables.iter_mut().find(|(table, _)| *table == entry.table) {
            Some((_, entries)) => entries.push(entry),
            None => self.tables.push((entry.table.clone(), vec![entry])),
        }
        self.len += 1;
    }
}
