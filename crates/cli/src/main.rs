use anyhow::Result;
use catalog_cli::{CliConfig, DeleteWhereCommand, IngestCommand, QueryCommand, SourceInfoCommand};
use clap::{Parser, Subcommand};
use common::{init_structured_logging, LogFormat};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "Federated catalog: query, ingest and administer bound sources")]
#[command(version)]
struct Cli {
    /// TOML configuration with framework, logging and source sections
    #[arg(short, long, global = true, env = "CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the local index or the whole enterprise
    Query(QueryCommand),
    /// Create items, optionally with stored content
    Ingest(IngestCommand),
    /// Describe the framework and its sources
    #[command(alias = "sources")]
    SourceInfo(SourceInfoCommand),
    /// Delete every item matching a filter
    DeleteWhere(DeleteWhereCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    init_structured_logging(&config.logging)?;

    let framework = config.build_framework().await?;

    let outcome = match &cli.command {
        Commands::Query(command) => command.execute(&framework).await,
        Commands::Ingest(command) => command.execute(&framework).await,
        Commands::SourceInfo(command) => command.execute(&framework).await,
        Commands::DeleteWhere(command) => command.execute(&framework).await,
    };

    framework.shutdown().await;
    if let Err(e) = &outcome {
        error!("Command failed: {:#}", e);
    }
    outcome
}
