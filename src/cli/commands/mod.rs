pub mod backups;
pub mod consume;
pub mod migrate;
pub mod query;
pub mod recover;
