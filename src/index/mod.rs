// Search index side of the dual write: bulk operations and response handling

pub mod elastic;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::MigrationError;
use crate::types::Document;

pub use elastic::ElasticClient;

/// The only per-item failure a run tolerates: a newer write already holds the document
pub const VERSION_CONFLICT: &str = "version_conflict_engine_exception";

/// One item of a bulk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    Index {
        index_type: String,
        id: String,
        /// External version; the index rejects it when it already holds a higher one
        version: i64,
        routing: Option<String>,
        document: Document,
    },
    Delete {
        index_type: String,
        id: String,
    },
}

impl BulkOperation {
    pub fn id(&self) -> &str {
        match self {
            BulkOperation::Index { id, .. } | BulkOperation::Delete { id, .. } => id,
        }
    }

    pub fn index_type(&self) -> &str {
        match self {
            BulkOperation::Index { index_type, .. } | BulkOperation::Delete { index_type, .. } => {
                index_type
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    /// Each item is keyed by its action name (`index`, `delete`, ...)
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_type", default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

impl BulkResponse {
    /// Items that carry an error object
    pub fn failed(&self) -> impl Iterator<Item = &BulkItem> {
        self.items
            .iter()
            .flat_map(|item| item.values())
            .filter(|item| item.error.is_some())
    }
}

/// Outcome of a bulk call that did not abort the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub items: usize,
    pub version_conflicts: usize,
}

/// Bulk endpoint of the search index
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Submit all operations as one request. Transport failures are errors; per-item failures
    /// are reported in the response.
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, MigrationError>;
}

/// Submit one bulk request and apply the failure policy: version conflicts are logged and
/// skipped, any other item failure aborts with `Index`
pub async fn submit_bulk(
    index: &dyn SearchIndex,
    operations: &[BulkOperation],
) -> Result<BulkSummary, MigrationError> {
    if operations.is_empty() {
        return Ok(BulkSummary::default());
    }
    let response = index.bulk(operations).await?;
    check_bulk_response(&response)
}

pub fn check_bulk_response(response: &BulkResponse) -> Result<BulkSummary, MigrationError> {
    let mut summary = BulkSummary {
        items: response.items.len(),
        version_conflicts: 0,
    };
    if !response.errors {
        return Ok(summary);
    }

    for item in response.failed() {
        let Some(error) = &item.error else { continue };
        if error.kind == VERSION_CONFLICT {
            summary.version_conflicts += 1;
            tracing::warn!("Skipping version conflict for id {}: {}", item.id, error.reason);
            continue;
        }

        tracing::error!(
            "Bulk item failed: type={:?} id={} status={} reason type={} reason={}",
            item.doc_type, item.id, item.status, error.kind, error.reason
        );
        return Err(MigrationError::index(format!(
            "bulk item {} failed with {}: {}",
            item.id, error.kind, error.reason
        )));
    }

    Ok(summary)
}
