use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::{DatabaseManager, PgStore};
use crate::index::ElasticClient;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(Value::Object(extra)), Some(target)) = (data, response.as_object_mut()) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output a run summary: the message, then one `name: value` line per field in text mode
pub fn output_report<T: Serialize>(
    output_format: &OutputFormat,
    message: &str,
    report: &T,
) -> anyhow::Result<()> {
    let fields = serde_json::to_value(report)?;
    if let OutputFormat::Text = output_format {
        println!("✓ {}", message);
        if let Value::Object(map) = &fields {
            for (name, value) in map {
                match value {
                    Value::String(s) => println!("  {}: {}", name, s),
                    other => println!("  {}: {}", name, other),
                }
            }
        }
        return Ok(());
    }
    output_success(output_format, message, Some(fields))
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(
    output_format: &OutputFormat,
    collection_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                collection_name: []
            }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Load configuration from the environment, applying a `--backup-dir` override
pub fn load_config(backup_dir: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(dir) = backup_dir {
        config.migration.backup_dir = dir;
    }
    Ok(config)
}

/// Open both stores described by `config`
pub async fn connect_stores(config: &AppConfig) -> anyhow::Result<(PgStore, ElasticClient)> {
    let pool = DatabaseManager::connect(&config.postgres).await?;
    let index = ElasticClient::connect(&config.elastic).await?;
    Ok((PgStore::new(pool), index))
}
