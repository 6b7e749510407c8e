pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod migration;
pub mod recovery;
pub mod transform;
pub mod types;

#[cfg(test)]
pub mod testing;
