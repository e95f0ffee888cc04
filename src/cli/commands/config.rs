//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, PROJECT_CONFIG_FILE};
use crate::error::StagehandResult;
use console::style;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> StagehandResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
    }

    Ok(())
}

fn show_config(config: &Config) -> StagehandResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());

    let project = std::env::current_dir()
        .ok()
        .and_then(|cwd| ConfigManager::find_local_config(&cwd));
    match project {
        Some(path) => println!("{}", path.display()),
        None => eprintln!(
            "{} no {} found",
            style("note:").dim(),
            PROJECT_CONFIG_FILE
        ),
    }
}
