use clap::Args;
use futures::StreamExt;
use serde_json::json;
use std::path::PathBuf;

use crate::cli::utils::load_config;
use crate::cli::OutputFormat;
use crate::database::{validate_query, DatabaseManager, OriginReader};
use crate::transform::{ProcessTransformer, Transformer};

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long, help = "Plugin that supplies the origin query", conflicts_with = "query", required_unless_present = "query")]
    pub plugin: Option<PathBuf>,

    #[arg(long, help = "Origin query; must start with SELECT")]
    pub query: Option<String>,
}

pub async fn handle(args: QueryArgs, _output_format: OutputFormat) -> anyhow::Result<()> {
    let query = match (args.query, args.plugin) {
        (Some(query), _) => query,
        (None, Some(plugin)) => ProcessTransformer::new(plugin).describe_query().await?,
        (None, None) => anyhow::bail!("either --plugin or --query is required"),
    };
    validate_query(&query)?;

    let config = load_config(None)?;
    let pool = DatabaseManager::connect(&config.postgres).await?;
    let reader = OriginReader::new(pool.clone());

    let mut rows = reader.read(&query)?;
    let mut count = 0usize;
    while let Some(record) = rows.next().await {
        let record = record?;
        println!("{}", json!({ "id": record.id, "data": record.data }));
        count += 1;
    }
    drop(rows);
    pool.close().await;

    tracing::info!("Origin query returned {} row(s)", count);
    Ok(())
}
