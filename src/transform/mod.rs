//! External transformation step.
//!
//! A plugin decides which rows to read and what each one becomes. The engine only sees the
//! [`Transformer`] trait; [`ProcessTransformer`] runs the plugin once per call and
//! [`StreamTransformer`] keeps a single plugin process alive for the whole run.

pub mod process;
pub mod stream;

use async_trait::async_trait;

use crate::error::MigrationError;
use crate::types::{Document, MutationRecord};

pub use process::ProcessTransformer;
pub use stream::StreamTransformer;

/// Plugin output that signals failure for the current record
pub const ERROR_SENTINEL: &str = "error";

#[async_trait]
pub trait Transformer: Send {
    /// The origin selection; must begin with `SELECT`
    async fn describe_query(&mut self) -> Result<String, MigrationError>;

    /// Transform one origin document into zero or more mutations.
    ///
    /// Output must be deterministic for identical input within a run.
    async fn apply(&mut self, id: &str, data: &Document) -> Result<Vec<MutationRecord>, MigrationError>;
}

/// Decode one plugin response: the `error` sentinel or a JSON array of mutation records
pub fn parse_mutations(id: &str, payload: &str) -> Result<Vec<MutationRecord>, MigrationError> {
    let payload = payload.trim();
    if payload == ERROR_SENTINEL {
        return Err(MigrationError::transform(id, "plugin reported error"));
    }
    if payload.is_empty() {
        return Err(MigrationError::transform(id, "plugin produced no output"));
    }
    if payload == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(payload)
        .map_err(|e| MigrationError::transform(id, format!("malformed plugin output: {}", e)))
}
