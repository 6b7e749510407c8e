use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::MigrationError;

/// Default number of buffered mutations that triggers a flush
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    pub elastic: ElasticConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub port: u16,
    pub database: String,
    pub sslmode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub urls: Vec<String>,
    pub sniff: bool,
    pub index: String,
    /// Emit `_type` on bulk actions (pre-7.x clusters keep one type per table)
    pub document_types: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub batch_size: usize,
    pub backup_dir: PathBuf,
    /// Relational table name → index document type
    pub table_mapping: HashMap<String, String>,
}

impl AppConfig {
    /// Build configuration from process environment.
    ///
    /// Only the binary calls this; everything below it receives the resulting values.
    pub fn from_env() -> Result<Self, MigrationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, MigrationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = [
            "POSTGRES_HOST",
            "POSTGRES_USER",
            "POSTGRES_PASSWORD",
            "ELASTIC_URLS",
            "ELASTIC_SNIFF",
            "ELASTIC_DB",
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| lookup(key).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::config(format!(
                "environment variable not set: {}",
                missing.join(", ")
            )));
        }

        let get = |key: &str| lookup(key).unwrap_or_default();

        Ok(Self {
            postgres: PostgresConfig {
                host: get("POSTGRES_HOST"),
                user: get("POSTGRES_USER"),
                password: get("POSTGRES_PASSWORD"),
                port: 5432,
                database: "meepshop".to_string(),
                sslmode: "disable".to_string(),
            },
            elastic: ElasticConfig {
                urls: split_list(&get("ELASTIC_URLS")),
                sniff: get("ELASTIC_SNIFF") == "true",
                index: get("ELASTIC_DB"),
                document_types: true,
            },
            migration: MigrationConfig {
                batch_size: DEFAULT_BATCH_SIZE,
                backup_dir: PathBuf::from("backup"),
                table_mapping: HashMap::new(),
            },
        }
        .with_overrides(&lookup))
    }

    fn with_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Postgres overrides
        if let Some(v) = lookup("POSTGRES_PORT") {
            self.postgres.port = v.parse().unwrap_or(self.postgres.port);
        }
        if let Some(v) = lookup("POSTGRES_DB") {
            self.postgres.database = v;
        }
        if let Some(v) = lookup("POSTGRES_SSLMODE") {
            self.postgres.sslmode = v;
        }

        // Elastic overrides
        if let Some(v) = lookup("ELASTIC_DOC_TYPES") {
            self.elastic.document_types = v.parse().unwrap_or(self.elastic.document_types);
        }

        // Migration overrides
        if let Some(v) = lookup("MIGRATION_BATCH_SIZE") {
            self.migration.batch_size = v
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .unwrap_or(self.migration.batch_size);
        }
        if let Some(v) = lookup("MIGRATION_BACKUP_DIR") {
            self.migration.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MIGRATION_TABLE_MAPPING") {
            self.migration.table_mapping = parse_table_mapping(&v);
        }

        self
    }
}

impl MigrationConfig {
    /// Backup directory without loading the rest of the configuration
    pub fn backup_dir_from_env() -> PathBuf {
        env::var("MIGRATION_BACKUP_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| MigrationConfig::default().backup_dir)
    }

    /// Index document type for a relational table; unmapped tables keep their own name
    pub fn index_type<'a>(&'a self, table: &'a str) -> &'a str {
        self.table_mapping
            .get(table)
            .map(String::as_str)
            .unwrap_or(table)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            backup_dir: PathBuf::from("backup"),
            table_mapping: HashMap::new(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `pg_table=index_type,other=type` pairs, skipping malformed entries
fn parse_table_mapping(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| {
            let (table, index_type) = pair.split_once('=')?;
            let (table, index_type) = (table.trim(), index_type.trim());
            if table.is_empty() || index_type.is_empty() {
                return None;
            }
            Some((table.to_string(), index_type.to_string()))
        })
        .collect()
}
