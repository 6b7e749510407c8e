use clap::Args;
use serde_json::json;
use std::path::PathBuf;

use crate::backup::list_backups;
use crate::cli::utils::output_empty_collection;
use crate::cli::OutputFormat;
use crate::config::MigrationConfig;

#[derive(Args, Debug)]
pub struct BackupsArgs {
    #[arg(long, help = "Directory holding backup files (overrides MIGRATION_BACKUP_DIR)")]
    pub backup_dir: Option<PathBuf>,
}

pub async fn handle(args: BackupsArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let dir = args
        .backup_dir
        .unwrap_or_else(MigrationConfig::backup_dir_from_env);
    let keys = list_backups(&dir).await?;

    if keys.is_empty() {
        return output_empty_collection(
            &output_format,
            "backups",
            &format!("No backups in {}", dir.display()),
        );
    }

    match output_format {
        OutputFormat::Json => {
            let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "backups": keys }))?);
        }
        OutputFormat::Text => {
            for key in &keys {
                println!("{}", key);
            }
        }
    }
    Ok(())
}
