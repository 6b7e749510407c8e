use clap::Args;
use std::path::PathBuf;
use tokio::io::BufReader;

use crate::backup::{BackupKey, BackupRecorder, BackupWriter};
use crate::cli::utils::{connect_stores, load_config, output_report};
use crate::cli::OutputFormat;
use crate::migration::{run_clock, MigrationEngine, VersionPolicy};
use crate::transform::stream::mutation_feed;

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    #[arg(long, help = "Directory for backup files (overrides MIGRATION_BACKUP_DIR)")]
    pub backup_dir: Option<PathBuf>,
}

/// Push mode: every stdin line is the mutation array of one origin record
pub async fn handle(args: ConsumeArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.backup_dir)?;
    let (store, index) = connect_stores(&config).await?;

    let key = BackupKey::now();
    let writer = BackupWriter::create(&config.migration.backup_dir, key.clone()).await?;
    tracing::info!("Backup key for this run: {}", key);

    let engine = MigrationEngine::new(
        &store,
        &index,
        &config.migration,
        BackupRecorder::new(writer),
        VersionPolicy::push(run_clock()),
    );
    let feed = mutation_feed(BufReader::new(tokio::io::stdin()));
    let report = engine.run_push(feed).await;
    store.close().await;
    let report = report?;

    output_report(
        &output_format,
        &format!("Consumed {} record(s) into backup {}", report.records_read, key),
        &report,
    )
}
