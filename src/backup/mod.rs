//! Backup file pair written ahead of every destructive change.
//!
//! A backup is keyed by the UTC start time of its run (`YYYYMMDDHHMMSS`) and lives in two
//! append-only files:
//!
//! - `<key>_originData`: one pre-image per line. Written as a versioned JSON object; the older
//!   `table!@#id!@#parent!@#document` layout is still readable.
//! - `<key>_upsertID`: a table name line followed by a comma-joined id line, once per flushed
//!   table batch. Recovery deletes these ids before reinserting pre-images.

pub mod reader;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::MigrationError;
use crate::types::Document;

pub use reader::{BackupReader, ChangeIndexReader, OriginLogReader};
pub use writer::{BackupRecorder, BackupWriter};

pub const ORIGIN_SUFFIX: &str = "_originData";
pub const CHANGE_INDEX_SUFFIX: &str = "_upsertID";

/// Delimiter of the pre-JSON origin log layout
pub const LEGACY_DELIMITER: &str = "!@#";

/// Current origin log record version
pub const FORMAT_VERSION: u32 = 1;

const KEY_FORMAT: &str = "%Y%m%d%H%M%S";

/// UTC timestamp identifying one run's backup
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupKey(String);

impl BackupKey {
    pub fn now() -> Self {
        Self::from_time(Utc::now())
    }

    pub fn from_time(time: DateTime<Utc>) -> Self {
        BackupKey(time.format(KEY_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn origin_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.0, ORIGIN_SUFFIX))
    }

    pub fn change_index_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.0, CHANGE_INDEX_SUFFIX))
    }
}

impl FromStr for BackupKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 14 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(MigrationError::backup(format!(
                "backup key must be YYYYMMDDHHMMSS, got {:?}",
                s
            )));
        }
        chrono::NaiveDateTime::parse_from_str(s, KEY_FORMAT)
            .map_err(|e| MigrationError::backup(format!("backup key {} is not a valid time: {}", s, e)))?;
        Ok(BackupKey(s.to_string()))
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pre-image of one row about to be deleted or overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLogEntry {
    pub table: String,
    pub id: String,
    pub parent: String,
    pub data: Document,
}

/// Identifiers touched by one flushed batch of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeIndexEntry {
    pub table: String,
    pub ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct OriginLine<'a> {
    v: u32,
    #[serde(borrow)]
    table: std::borrow::Cow<'a, str>,
    #[serde(borrow)]
    id: std::borrow::Cow<'a, str>,
    #[serde(borrow)]
    parent: std::borrow::Cow<'a, str>,
    #[serde(borrow)]
    data: std::borrow::Cow<'a, str>,
}

impl BackupLogEntry {
    /// One origin log line, without the trailing newline
    pub fn encode(&self) -> Result<String, MigrationError> {
        let line = OriginLine {
            v: FORMAT_VERSION,
            table: self.table.as_str().into(),
            id: self.id.as_str().into(),
            parent: self.parent.as_str().into(),
            data: self.data.as_str().into(),
        };
        Ok(serde_json::to_string(&line)?)
    }

    /// Decode either layout
    pub fn decode(line: &str) -> Result<Self, MigrationError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.starts_with('{') {
            let parsed: OriginLine = serde_json::from_str(line)?;
            if parsed.v != FORMAT_VERSION {
                return Err(MigrationError::backup(format!(
                    "unsupported origin log version {}",
                    parsed.v
                )));
            }
            return Ok(BackupLogEntry {
                table: parsed.table.into_owned(),
                id: parsed.id.into_owned(),
                parent: parsed.parent.into_owned(),
                data: Document::new(parsed.data.into_owned()),
            });
        }

        let mut parts = line.splitn(4, LEGACY_DELIMITER);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(table), Some(id), Some(parent), Some(data)) if !table.is_empty() => {
                Ok(BackupLogEntry {
                    table: table.to_string(),
                    id: id.to_string(),
                    parent: parent.to_string(),
                    data: Document::new(data),
                })
            }
            _ => Err(MigrationError::backup(format!(
                "unrecognised origin log line: {:.80}",
                line
            ))),
        }
    }
}

impl ChangeIndexEntry {
    /// Ids are stored comma-joined on one line, so they must not contain separators
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.table.is_empty() || self.table.contains(['\n', '\r']) {
            return Err(MigrationError::backup(format!("invalid table name {:?}", self.table)));
        }
        if let Some(bad) = self.ids.iter().find(|id| id.is_empty() || id.contains([',', '\n', '\r'])) {
            return Err(MigrationError::backup(format!(
                "id {:?} in {} cannot be recorded in the change index",
                bad, self.table
            )));
        }
        Ok(())
    }

    /// Table line and id line, both newline-terminated
    pub fn encode(&self) -> String {
        format!("{}\n{}\n", self.table, self.ids.join(","))
    }
}

/// Keys in `dir` that have both backup files, oldest first
pub async fn list_backups(dir: &Path) -> Result<Vec<BackupKey>, MigrationError> {
    let mut keys = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(prefix) = name.strip_suffix(ORIGIN_SUFFIX) else { continue };
        let Ok(key) = prefix.parse::<BackupKey>() else { continue };
        if tokio::fs::try_exists(key.change_index_path(dir)).await.unwrap_or(false) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}
