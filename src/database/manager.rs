use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::PostgresConfig;
use crate::error::MigrationError;

/// Builds the single Postgres pool a run holds for its lifetime.
///
/// The origin cursor keeps one connection busy while flushes run their transactions on another,
/// so the pool is small but never one.
pub struct DatabaseManager;

impl DatabaseManager {
    const MAX_CONNECTIONS: u32 = 4;

    /// Connect using explicit configuration values
    pub async fn connect(config: &PostgresConfig) -> Result<PgPool, MigrationError> {
        let connection_string = Self::build_connection_string(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(Self::MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .map_err(|e| MigrationError::persistence(format!("connect failed: {}", e)))?;

        info!(
            "Connected to postgres {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(pool)
    }

    fn build_connection_string(config: &PostgresConfig) -> Result<String, MigrationError> {
        let base = format!("postgres://{}:{}/{}", config.host, config.port, config.database);
        let mut url = url::Url::parse(&base)
            .map_err(|e| MigrationError::config(format!("invalid postgres host: {}", e)))?;

        // Credentials go through the setters so reserved characters get percent-encoded
        url.set_username(&config.user)
            .map_err(|_| MigrationError::config("invalid postgres user"))?;
        url.set_password(Some(&config.password))
            .map_err(|_| MigrationError::config("invalid postgres password"))?;
        url.query_pairs_mut().append_pair("sslmode", &config.sslmode);
        Ok(url.into())
    }

    /// Quote a possibly schema-qualified table name after validating it
    pub fn quote_table(name: &str) -> Result<String, MigrationError> {
        if !Self::is_valid_table_name(name) {
            return Err(MigrationError::InvalidIdentifier(name.to_string()));
        }
        Ok(name
            .split('.')
            .map(Self::quote_identifier)
            .collect::<Vec<_>>()
            .join("."))
    }

    /// Quote SQL identifier to prevent injection
    fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Table names come from plugin output, so only plain `table` or `schema.table` made of
    /// `[A-Za-z0-9_]` (not starting with a digit) are accepted
    pub fn is_valid_table_name(name: &str) -> bool {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.is_empty() || parts.len() > 2 {
            return false;
        }
        parts.iter().all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
    }
}
