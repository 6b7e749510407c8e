use std::collections::HashSet;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::backup::{BackupKey, BackupLogEntry, ChangeIndexEntry};
use crate::database::{RelationalStore, StoredRow};
use crate::error::MigrationError;

/// Append-only writer for one run's backup file pair.
///
/// Files are created fresh; an existing backup with the same key is never overwritten. Every
/// append is synced to disk before it returns.
#[derive(Debug)]
pub struct BackupWriter {
    key: BackupKey,
    origin: File,
    change_index: File,
    entries_written: usize,
    batches_written: usize,
}

impl BackupWriter {
    pub async fn create(dir: &Path, key: BackupKey) -> Result<Self, MigrationError> {
        tokio::fs::create_dir_all(dir).await?;
        let origin = Self::open_new(&key.origin_path(dir)).await?;
        let change_index = Self::open_new(&key.change_index_path(dir)).await?;
        Ok(Self {
            key,
            origin,
            change_index,
            entries_written: 0,
            batches_written: 0,
        })
    }

    async fn open_new(path: &Path) -> Result<File, MigrationError> {
        OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| MigrationError::backup(format!("cannot create {}: {}", path.display(), e)))
    }

    pub fn key(&self) -> &BackupKey {
        &self.key
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    pub fn batches_written(&self) -> usize {
        self.batches_written
    }

    /// Append the pre-images and the change index entry of one table batch, then sync both files
    pub async fn append(
        &mut self,
        pre_images: &[BackupLogEntry],
        changes: &ChangeIndexEntry,
    ) -> Result<(), MigrationError> {
        // nothing is written for an entry that cannot be indexed
        changes.validate()?;

        let mut buffer = String::new();
        for entry in pre_images {
            buffer.push_str(&entry.encode()?);
            buffer.push('\n');
        }
        if !buffer.is_empty() {
            self.origin.write_all(buffer.as_bytes()).await?;
            self.origin.sync_data().await?;
        }

        self.change_index.write_all(changes.encode().as_bytes()).await?;
        self.change_index.sync_data().await?;

        self.entries_written += pre_images.len();
        self.batches_written += 1;
        Ok(())
    }
}

/// Captures current row images ahead of a destructive write.
///
/// Each `(table, id)` is backed up at most once per run, so the backup holds the state from
/// before the migration first touched the row.
#[derive(Debug)]
pub struct BackupRecorder {
    writer: BackupWriter,
    recorded: HashSet<(String, String)>,
}

impl BackupRecorder {
    pub fn new(writer: BackupWriter) -> Self {
        Self {
            writer,
            recorded: HashSet::new(),
        }
    }

    pub fn key(&self) -> &BackupKey {
        self.writer.key()
    }

    /// Back up every existing row among `ids` in `table` and record `ids` as touched.
    ///
    /// Returns the number of pre-images written. When this returns, both files are durable.
    pub async fn record(
        &mut self,
        store: &dyn RelationalStore,
        table: &str,
        ids: &[String],
    ) -> Result<usize, MigrationError> {
        let fresh: Vec<String> = ids
            .iter()
            .filter(|id| !self.recorded.contains(&(table.to_string(), id.to_string())))
            .cloned()
            .collect();
        if fresh.len() < ids.len() {
            warn!(
                "{} id(s) in {} were already backed up earlier in this run",
                ids.len() - fresh.len(),
                table
            );
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let changes = ChangeIndexEntry {
            table: table.to_string(),
            ids: fresh,
        };
        changes.validate()?;

        let rows = store.fetch_rows(table, &changes.ids).await?;
        let pre_images: Vec<BackupLogEntry> = rows
            .into_iter()
            .map(|StoredRow { id, parent, data }| BackupLogEntry {
                table: table.to_string(),
                id,
                parent,
                data,
            })
            .collect();

        self.writer.append(&pre_images, &changes).await?;
        debug!(
            "Backed up {} of {} row(s) from {} into {}",
            pre_images.len(),
            changes.ids.len(),
            table,
            self.writer.key()
        );
        self.recorded
            .extend(changes.ids.into_iter().map(|id| (table.to_string(), id)));
        Ok(pre_images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupReader;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn writes_pre_images_then_change_index() {
        let dir = tempfile::tempdir().unwrap();
        let key: BackupKey = "20190102030405".parse().unwrap();
        let store = MemoryStore::new();
        store.seed("users", "42", r#"{"name":"a"}"#);

        let writer = BackupWriter::create(dir.path(), key.clone()).await.unwrap();
        let mut recorder = BackupRecorder::new(writer);
        let ids = vec!["42".to_string(), "43".to_string()];
        assert_eq!(recorder.record(&store, "users", &ids).await.unwrap(), 1);

        let origin = std::fs::read_to_string(key.origin_path(dir.path())).unwrap();
        assert_eq!(origin.lines().count(), 1);
        let entry = BackupLogEntry::decode(origin.lines().next().unwrap()).unwrap();
        assert_eq!(entry.id, "42");
        assert_eq!(entry.data.as_str(), r#"{"name":"a"}"#);

        let changes = std::fs::read_to_string(key.change_index_path(dir.path())).unwrap();
        assert_eq!(changes, "users\n42,43\n");
    }

    #[tokio::test]
    async fn never_overwrites_an_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let key: BackupKey = "20190102030405".parse().unwrap();
        let _first = BackupWriter::create(dir.path(), key.clone()).await.unwrap();
        assert!(matches!(
            BackupWriter::create(dir.path(), key).await,
            Err(MigrationError::Backup(_))
        ));
    }

    #[tokio::test]
    async fn revisited_ids_keep_their_first_pre_image() {
        let dir = tempfile::tempdir().unwrap();
        let key: BackupKey = "20190102030405".parse().unwrap();
        let store = MemoryStore::new();
        store.seed("users", "1", r#"{"v":"original"}"#);

        let writer = BackupWriter::create(dir.path(), key.clone()).await.unwrap();
        let mut recorder = BackupRecorder::new(writer);
        let ids = vec!["1".to_string()];
        recorder.record(&store, "users", &ids).await.unwrap();
        store.seed("users", "1", r#"{"v":"migrated"}"#);
        assert_eq!(recorder.record(&store, "users", &ids).await.unwrap(), 0);

        let reader = BackupReader::open(dir.path(), key).await.unwrap();
        let mut log = reader.origin_log().await.unwrap();
        let entry = log.next_entry().await.unwrap().unwrap();
        assert_eq!(entry.data.as_str(), r#"{"v":"original"}"#);
        assert!(log.next_entry().await.unwrap().is_none());

        let mut changes = reader.change_index().await.unwrap();
        assert_eq!(changes.next_entry().await.unwrap().unwrap().ids, vec!["1"]);
        assert!(changes.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_ids_that_cannot_be_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let key: BackupKey = "20190102030405".parse().unwrap();
        let store = MemoryStore::new();
        let writer = BackupWriter::create(dir.path(), key.clone()).await.unwrap();
        let mut recorder = BackupRecorder::new(writer);

        let ids = vec!["a,b".to_string()];
        assert!(recorder.record(&store, "users", &ids).await.is_err());
        let changes = std::fs::read_to_string(key.change_index_path(dir.path())).unwrap();
        assert!(changes.is_empty());
    }
}
