use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row};

use crate::database::manager::DatabaseManager;
use crate::error::MigrationError;
use crate::types::Document;

/// Postgres caps bind parameters per statement; two per row keeps us well under it
const MAX_ROWS_PER_INSERT: usize = 10_000;

/// One relational row as the pipeline sees it: identifier, parent reference, document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    /// Derived from the document's `__parent` field, empty when absent
    pub parent: String,
    pub data: Document,
}

/// Relational side of the dual write.
///
/// Every method is one statement or one transaction; callers sequence them.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Current row images for `ids`, in no particular order. Missing ids are simply absent.
    async fn fetch_rows(&self, table: &str, ids: &[String]) -> Result<Vec<StoredRow>, MigrationError>;

    /// Delete `delete_ids` then insert `rows`, committed as one transaction
    async fn replace_rows(
        &self,
        table: &str,
        delete_ids: &[String],
        rows: &[StoredRow],
    ) -> Result<(), MigrationError>;

    /// Delete outside any explicit transaction. Absent ids are not an error.
    async fn delete_rows(&self, table: &str, ids: &[String]) -> Result<u64, MigrationError>;

    /// Insert rows, overwriting any existing row with the same id
    async fn restore_rows(&self, table: &str, rows: &[StoredRow]) -> Result<(), MigrationError>;
}

/// `RelationalStore` over tables shaped `(id text, data jsonb)`
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn insert_builder<'a>(
        quoted_table: &str,
        rows: &'a [StoredRow],
        overwrite: bool,
    ) -> sqlx::QueryBuilder<'a, Postgres> {
        let mut builder =
            sqlx::QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (id, data) ", quoted_table));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.id.as_str())
                .push_bind(row.data.as_str())
                .push_unseparated("::jsonb");
        });
        if overwrite {
            builder.push(" ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data");
        }
        builder
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn fetch_rows(&self, table: &str, ids: &[String]) -> Result<Vec<StoredRow>, MigrationError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let quoted = DatabaseManager::quote_table(table)?;
        let query = format!(
            "SELECT id::text AS id, COALESCE(data->>'__parent', '') AS parent, data::text AS data \
             FROM {} WHERE id = ANY($1)",
            quoted
        );

        let rows = sqlx::query(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::persistence(format!("backup read on {}: {}", table, e)))?;

        rows.into_iter()
            .map(|row| -> Result<StoredRow, MigrationError> {
                Ok(StoredRow {
                    id: row.try_get("id")?,
                    parent: row.try_get("parent")?,
                    data: Document::new(row.try_get::<String, _>("data")?),
                })
            })
            .collect()
    }

    async fn replace_rows(
        &self,
        table: &str,
        delete_ids: &[String],
        rows: &[StoredRow],
    ) -> Result<(), MigrationError> {
        let quoted = DatabaseManager::quote_table(table)?;
        let mut tx = self.pool.begin().await?;

        if !delete_ids.is_empty() {
            let delete_sql = format!("DELETE FROM {} WHERE id = ANY($1)", quoted);
            sqlx::query(&delete_sql)
                .bind(delete_ids)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::persistence(format!("delete on {}: {}", table, e)))?;
        }

        for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
            Self::insert_builder(&quoted, chunk, false)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::persistence(format!("insert on {}: {}", table, e)))?;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .await
            .map_err(|e| MigrationError::persistence(format!("commit on {}: {}", table, e)))?;
        Ok(())
    }

    async fn delete_rows(&self, table: &str, ids: &[String]) -> Result<u64, MigrationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let quoted = DatabaseManager::quote_table(table)?;
        let delete_sql = format!("DELETE FROM {} WHERE id = ANY($1)", quoted);
        let result = sqlx::query(&delete_sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::persistence(format!("delete on {}: {}", table, e)))?;
        Ok(result.rows_affected())
    }

    async fn restore_rows(&self, table: &str, rows: &[StoredRow]) -> Result<(), MigrationError> {
        let quoted = DatabaseManager::quote_table(table)?;
        for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
            Self::insert_builder(&quoted, chunk, true)
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| MigrationError::persistence(format!("restore on {}: {}", table, e)))?;
        }
        Ok(())
    }
}
