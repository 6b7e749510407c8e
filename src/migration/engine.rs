use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::backup::{BackupKey, BackupRecorder};
use crate::config::MigrationConfig;
use crate::database::{OriginReader, RelationalStore};
use crate::error::MigrationError;
use crate::index::SearchIndex;
use crate::migration::batch::{Batch, BatchAccumulator};
use crate::migration::writer::{DualStoreWriter, VersionPolicy};
use crate::transform::Transformer;
use crate::types::{MutationRecord, OriginRecord};

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub backup_key: String,
    pub records_read: usize,
    pub mutations: usize,
    pub flushes: usize,
    pub pre_images: usize,
    pub rows_inserted: usize,
    pub bulk_items: usize,
    pub version_conflicts: usize,
}

/// Current wall clock in nanoseconds, the version source for documents without their own
pub fn run_clock() -> i64 {
    // out of range only past year 2262
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Drives one migration run: transform, accumulate, back up, then write both stores.
///
/// Within a flush each table is handled in turn, and its pre-images are durable on disk before
/// the first destructive statement for that table is issued.
pub struct MigrationEngine<'a> {
    store: &'a dyn RelationalStore,
    writer: DualStoreWriter<'a>,
    recorder: BackupRecorder,
    accumulator: BatchAccumulator,
    report: MigrationReport,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(
        store: &'a dyn RelationalStore,
        index: &'a dyn SearchIndex,
        config: &'a MigrationConfig,
        recorder: BackupRecorder,
        versions: VersionPolicy,
    ) -> Self {
        let report = MigrationReport {
            backup_key: recorder.key().to_string(),
            ..MigrationReport::default()
        };
        Self {
            store,
            writer: DualStoreWriter::new(store, index, config, versions),
            recorder,
            accumulator: BatchAccumulator::new(config.batch_size),
            report,
        }
    }

    pub fn backup_key(&self) -> &BackupKey {
        self.recorder.key()
    }

    /// Ask the plugin for its origin query, then migrate every row it selects
    pub async fn run_query(
        self,
        reader: &OriginReader,
        transformer: &mut dyn Transformer,
    ) -> Result<MigrationReport, MigrationError> {
        let query = transformer.describe_query().await?;
        info!("Origin query: {}", query);
        let origin = reader.read(&query)?;
        self.run_pull(origin, transformer).await
    }

    /// Pull mode: each origin row goes through the transformer
    pub async fn run_pull<S>(
        mut self,
        mut origin: S,
        transformer: &mut dyn Transformer,
    ) -> Result<MigrationReport, MigrationError>
    where
        S: Stream<Item = Result<OriginRecord, MigrationError>> + Unpin,
    {
        let outcome: Result<(), MigrationError> = async {
            while let Some(record) = origin.next().await {
                let record = record?;
                self.report.records_read += 1;
                let mutations = transformer.apply(&record.id, &record.data).await?;
                self.ingest(mutations).await?;
            }
            self.finish().await
        }
        .await;
        self.conclude(outcome)
    }

    /// Push mode: mutations arrive already transformed, one group per origin record
    pub async fn run_push<S>(mut self, mut feed: S) -> Result<MigrationReport, MigrationError>
    where
        S: Stream<Item = Result<Vec<MutationRecord>, MigrationError>> + Unpin,
    {
        let outcome: Result<(), MigrationError> = async {
            while let Some(mutations) = feed.next().await {
                let mutations = mutations?;
                self.report.records_read += 1;
                self.ingest(mutations).await?;
            }
            self.finish().await
        }
        .await;
        self.conclude(outcome)
    }

    async fn ingest(&mut self, mutations: Vec<MutationRecord>) -> Result<(), MigrationError> {
        self.report.mutations += mutations.len();
        if let Some(batch) = self.accumulator.extend(mutations) {
            self.flush(batch).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), MigrationError> {
        if let Some(batch) = self.accumulator.finish() {
            self.flush(batch).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, batch: Batch) -> Result<(), MigrationError> {
        let size = batch.len();
        for table_batch in batch.into_tables() {
            let ids = table_batch.ids();
            self.report.pre_images += self
                .recorder
                .record(self.store, &table_batch.table, &ids)
                .await?;

            let summary = self.writer.write_table(&table_batch).await?;
            self.report.rows_inserted += summary.inserted_rows;
            self.report.bulk_items += summary.bulk.items;
            self.report.version_conflicts += summary.bulk.version_conflicts;
        }
        self.report.flushes += 1;
        info!(
            "Flushed batch {} ({} mutations, {} records read so far)",
            self.report.flushes, size, self.report.records_read
        );
        Ok(())
    }

    fn conclude(self, outcome: Result<(), MigrationError>) -> Result<MigrationReport, MigrationError> {
        match outcome {
            Ok(()) => {
                info!(
                    "Migration finished: {} records, {} mutations, {} flushes, backup {}",
                    self.report.records_read,
                    self.report.mutations,
                    self.report.flushes,
                    self.report.backup_key
                );
                Ok(self.report)
            }
            Err(e) => {
                error!(
                    "Migration stopped after {} flushes: {}. Undo with: pgmig recover {}",
                    self.report.flushes, e, self.report.backup_key
                );
                debug!("Buffered mutations dropped: {}", self.accumulator.pending());
                Err(e)
            }
        }
    }
}
