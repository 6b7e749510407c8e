//! Origin reader: the read-only selection that feeds a migration run.

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::error::MigrationError;
use crate::types::{Document, OriginRecord};

/// Queries must open with this exact token, no leading whitespace
pub const QUERY_PREFIX: &str = "SELECT";

/// Reject anything that is not a plain `SELECT ...` before touching the connection
pub fn validate_query(query: &str) -> Result<(), MigrationError> {
    if query.starts_with(QUERY_PREFIX) {
        Ok(())
    } else {
        Err(MigrationError::QueryFormat(query.chars().take(80).collect()))
    }
}

pub struct OriginReader {
    pool: PgPool,
}

impl OriginReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lazily stream `(id, data)` pairs from the first two columns of `query`.
    ///
    /// Nothing is sent to the server until the stream is polled. The first error ends the run;
    /// restarting means calling `read` again.
    pub fn read<'a>(
        &'a self,
        query: &'a str,
    ) -> Result<BoxStream<'a, Result<OriginRecord, MigrationError>>, MigrationError> {
        validate_query(query)?;

        let stream = sqlx::query(query)
            .fetch(&self.pool)
            .map(|row| {
                let row = row.map_err(|e| MigrationError::persistence(format!("origin read: {}", e)))?;
                decode_origin_row(&row)
            })
            .boxed();
        Ok(stream)
    }
}

fn decode_origin_row(row: &PgRow) -> Result<OriginRecord, MigrationError> {
    if row.len() < 2 {
        return Err(MigrationError::persistence(
            "origin query must select at least (id, data)",
        ));
    }

    let id = match row.try_get::<String, _>(0) {
        Ok(id) => id,
        Err(_) => row
            .try_get::<i64, _>(0)
            .map(|n| n.to_string())
            .map_err(|e| MigrationError::persistence(format!("origin id column: {}", e)))?,
    };

    // text columns decode directly; json/jsonb come back as a value and are re-serialized
    let data = match row.try_get::<String, _>(1) {
        Ok(raw) => raw,
        Err(_) => row
            .try_get::<Value, _>(1)
            .map(|v| v.to_string())
            .map_err(|e| MigrationError::persistence(format!("origin data column for {}: {}", id, e)))?,
    };

    Ok(OriginRecord {
        id,
        data: Document::new(data),
    })
}
