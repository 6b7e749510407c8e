// Migration Error Types
use thiserror::Error;

/// Every failure that aborts a migration or recovery run.
///
/// None of these are retried. A run that stops with one of them leaves whatever was already
/// flushed in the backup files, so it can be undone with `recover`.
#[derive(Debug, Error)]
pub enum MigrationError {
    // Startup
    #[error("Configuration error: {0}")]
    Config(String),

    // Origin query guard, raised before any I/O
    #[error("Query must start with SELECT: {0:?}")]
    QueryFormat(String),

    // External transformation step
    #[error("Transform failed for id {id}: {reason}")]
    Transform { id: String, reason: String },

    // Relational read/write/commit
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Bulk transport failure or a non-conflict item failure
    #[error("Index error: {0}")]
    Index(String),

    // Backup log I/O or format
    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;

impl MigrationError {
    /// Stable code for JSON output and log correlation
    pub fn error_code(&self) -> &'static str {
        match self {
            MigrationError::Config(_) => "CONFIG_ERROR",
            MigrationError::QueryFormat(_) => "QUERY_FORMAT_ERROR",
            MigrationError::Transform { .. } => "TRANSFORM_ERROR",
            MigrationError::Persistence(_) => "PERSISTENCE_ERROR",
            MigrationError::Index(_) => "INDEX_ERROR",
            MigrationError::Backup(_) => "BACKUP_ERROR",
            MigrationError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
        }
    }
}

impl MigrationError {
    pub fn config(message: impl Into<String>) -> Self {
        MigrationError::Config(message.into())
    }

    pub fn transform(id: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::Transform {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        MigrationError::Persistence(message.into())
    }

    pub fn index(message: impl Into<String>) -> Self {
        MigrationError::Index(message.into())
    }

    pub fn backup(message: impl Into<String>) -> Self {
        MigrationError::Backup(message.into())
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        MigrationError::Index(err.to_string())
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Backup(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Backup(format!("malformed backup record: {}", err))
    }
}
