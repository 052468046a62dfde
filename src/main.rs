use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use codevec::cli::{Cli, Commands};
use codevec::config::Config;
use codevec::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let config = Config::load(&project_root).unwrap_or_default();

    // The guard must be held until program exit so logs are flushed
    let _logging_guard = init_logging(&config.logging, &project_root)?;

    tracing::info!("codevec starting up");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            codevec::commands::init::run(force).await?;
        }
        Commands::Index { path } => {
            codevec::commands::index::run(path).await?;
        }
        Commands::Status => {
            codevec::commands::status::run().await?;
        }
    }

    Ok(())
}
