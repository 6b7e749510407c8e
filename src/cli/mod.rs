pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "pgmig")]
#[command(about = "pgmig - Batched PostgreSQL to Elasticsearch migration with backup and recovery")]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        conflicts_with = "json",
        help = "Output in human-readable text format (default)"
    )]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Print the rows an origin query selects, one JSON object per line")]
    Query(commands::query::QueryArgs),

    #[command(about = "Apply pre-transformed mutation arrays read from stdin")]
    Consume(commands::consume::ConsumeArgs),

    #[command(about = "Read origin rows, transform them with a plugin, and write both stores")]
    Migrate(commands::migrate::MigrateArgs),

    #[command(about = "Undo a migration run from its backup files")]
    Recover(commands::recover::RecoverArgs),

    #[command(about = "List backups available for recovery")]
    Backups(commands::backups::BackupsArgs),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        match (cli.text, cli.json) {
            (false, true) => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Query(args) => commands::query::handle(args, output_format).await,
        Commands::Consume(args) => commands::consume::handle(args, output_format).await,
        Commands::Migrate(args) => commands::migrate::handle(args, output_format).await,
        Commands::Recover(args) => commands::recover::handle(args, output_format).await,
        Commands::Backups(args) => commands::backups::handle(args, output_format).await,
    }
}
