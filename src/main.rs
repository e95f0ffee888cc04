//! Stagehand - stage-based container image builder
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use stagehand::cli::{Cli, Commands};
use stagehand::config::ConfigManager;
use stagehand::error::{StagehandError, StagehandResult};
use stagehand::logging::init_tracing;
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StagehandResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| StagehandError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    // Logging depends on [general], so it starts after the config is read
    init_tracing(cli.verbose, &config.general);
    if let Some(ref path) = local_config_path {
        debug!("Found project config: {}", path.display());
    }

    ConfigManager::ensure_cache_dirs().await?;

    match cli.command {
        Commands::Build(args) => stagehand::cli::commands::build(args, &config).await,
        Commands::Plan(args) => stagehand::cli::commands::plan(args, &config).await,
        Commands::Sync(args) => stagehand::cli::commands::sync(args, &config).await,
        Commands::Values(args) => stagehand::cli::commands::values(args, &config).await,
        Commands::Registry(args) => stagehand::cli::commands::registry(args, &config).await,
        Commands::Config(args) => {
            stagehand::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
