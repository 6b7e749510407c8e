use clap::Args;
use std::path::PathBuf;

use crate::backup::{BackupKey, BackupRecorder, BackupWriter};
use crate::cli::utils::{connect_stores, load_config, output_report};
use crate::cli::OutputFormat;
use crate::database::OriginReader;
use crate::migration::{run_clock, MigrationEngine, VersionPolicy};
use crate::transform::{ProcessTransformer, StreamTransformer, Transformer};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[arg(long, help = "Transformation plugin executable")]
    pub plugin: PathBuf,

    #[arg(long, help = "Keep one plugin process alive and talk to it over stdin/stdout")]
    pub stream: bool,

    #[arg(long, help = "Directory for backup files (overrides MIGRATION_BACKUP_DIR)")]
    pub backup_dir: Option<PathBuf>,
}

pub async fn handle(args: MigrateArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.backup_dir)?;
    let mut transformer: Box<dyn Transformer> = if args.stream {
        Box::new(StreamTransformer::spawn(&args.plugin)?)
    } else {
        Box::new(ProcessTransformer::new(args.plugin))
    };

    let (store, index) = connect_stores(&config).await?;
    let reader = OriginReader::new(store.pool().clone());

    let key = BackupKey::now();
    let writer = BackupWriter::create(&config.migration.backup_dir, key.clone()).await?;
    tracing::info!("Backup key for this run: {}", key);

    let engine = MigrationEngine::new(
        &store,
        &index,
        &config.migration,
        BackupRecorder::new(writer),
        VersionPolicy::pull(run_clock()),
    );
    let report = engine.run_query(&reader, transformer.as_mut()).await;
    store.close().await;
    let report = report?;

    output_report(
        &output_format,
        &format!("Migrated {} record(s) into backup {}", report.records_read, key),
        &report,
    )
}
