use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::backup::{BackupKey, BackupLogEntry, ChangeIndexEntry};
use crate::error::MigrationError;

/// Read side of a sealed backup
#[derive(Debug, Clone)]
pub struct BackupReader {
    key: BackupKey,
    origin_path: PathBuf,
    change_index_path: PathBuf,
}

impl BackupReader {
    /// Locate both files for `key`; either one missing is an error
    pub async fn open(dir: &Path, key: BackupKey) -> Result<Self, MigrationError> {
        let origin_path = key.origin_path(dir);
        let change_index_path = key.change_index_path(dir);
        for path in [&origin_path, &change_index_path] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(MigrationError::backup(format!(
                    "backup {} is missing {}",
                    key,
                    path.display()
                )));
            }
        }
        Ok(Self {
            key,
            origin_path,
            change_index_path,
        })
    }

    pub fn key(&self) -> &BackupKey {
        &self.key
    }

    pub async fn change_index(&self) -> Result<ChangeIndexReader, MigrationError> {
        let file = File::open(&self.change_index_path).await?;
        Ok(ChangeIndexReader {
            lines: BufReader::new(file).lines(),
        })
    }

    pub async fn origin_log(&self) -> Result<OriginLogReader, MigrationError> {
        let file = File::open(&self.origin_path).await?;
        Ok(OriginLogReader {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

/// Sequential reader over `(table, ids)` line pairs
pub struct ChangeIndexReader {
    lines: Lines<BufReader<File>>,
}

impl ChangeIndexReader {
    pub async fn next_entry(&mut self) -> Result<Option<ChangeIndexEntry>, MigrationError> {
        let table = loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
            }
        };

        let Some(ids_line) = self.lines.next_line().await? else {
            return Err(MigrationError::backup(format!(
                "change index ends after table {} without an id line",
                table
            )));
        };
        let ids = ids_line
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Some(ChangeIndexEntry { table, ids }))
    }
}

/// Sequential reader over pre-image lines
pub struct OriginLogReader {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl OriginLogReader {
    pub async fn next_entry(&mut self) -> Result<Option<BackupLogEntry>, MigrationError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match BackupLogEntry::decode(&line) {
                Ok(entry) => Ok(Some(entry)),
                Err(MigrationError::Backup(reason)) => Err(MigrationError::backup(format!(
                    "origin log line {}: {}",
                    self.line_no, reason
                ))),
                Err(other) => Err(other),
            };
        }
    }
}
