use clap::Args;
use std::path::PathBuf;

use crate::backup::{BackupKey, BackupReader};
use crate::cli::utils::{connect_stores, load_config, output_report};
use crate::cli::OutputFormat;
use crate::migration::run_clock;
use crate::recovery::RecoveryEngine;

#[derive(Args, Debug)]
pub struct RecoverArgs {
    #[arg(help = "Backup key (YYYYMMDDHHMMSS) printed by the run to undo")]
    pub key: String,

    #[arg(long, help = "Directory holding backup files (overrides MIGRATION_BACKUP_DIR)")]
    pub backup_dir: Option<PathBuf>,
}

pub async fn handle(args: RecoverArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let key: BackupKey = args.key.parse()?;
    let config = load_config(args.backup_dir)?;
    // fail on missing files before opening any connection
    let backup = BackupReader::open(&config.migration.backup_dir, key).await?;

    let (store, index) = connect_stores(&config).await?;
    let engine = RecoveryEngine::new(&store, &index, &config.migration, run_clock());
    let report = engine.recover(&backup).await;
    store.close().await;
    let report = report?;

    output_report(
        &output_format,
        &format!("Recovered backup {}", report.backup_key),
        &report,
    )
}
