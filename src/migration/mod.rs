//! Batched dual-write migration.
//!
//! [`MigrationEngine`] reads origin records (or pre-transformed mutations), groups them in a
//! [`BatchAccumulator`], backs up every row a flush will touch, then hands each table batch
//! to the [`DualStoreWriter`].

pub mod batch;
pub mod engine;
pub mod writer;

pub use batch::{Batch, BatchAccumulator, TableBatch};
pub use engine::{run_clock, MigrationEngine, MigrationReport};
pub use writer::{parse_version, DualStoreWriter, TableWriteSummary, VersionPolicy};
