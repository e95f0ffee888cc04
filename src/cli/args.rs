//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stagehand - stage-based container image builder
///
/// Builds the images declared in stagehand.toml as chains of cached,
/// content-addressed stages.
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip stagehand.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build images, reusing cached stages
    Build(BuildArgs),

    /// Show stage signatures and cache state without building
    Plan(PlanArgs),

    /// Sync local changes into the worktree cache and print the synthetic commit
    Sync(SyncArgs),

    /// Print chart values referencing the images
    Values(ValuesArgs),

    /// Registry maintenance
    Registry(RegistryArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Images to build (defaults to all)
    pub images: Vec<String>,

    /// Build from HEAD plus local changes
    #[arg(long)]
    pub dev: bool,

    /// Open a shell in the stage's base image when a stage command fails
    #[arg(long, conflicts_with = "introspect_error")]
    pub introspect_before_error: bool,

    /// Open a shell in the failed stage's state when a stage command fails
    #[arg(long)]
    pub introspect_error: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Images to plan (defaults to all)
    pub images: Vec<String>,

    /// Plan from HEAD plus local changes
    #[arg(long)]
    pub dev: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Commit the synthetic commit is based on
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Sync only staged changes
    #[arg(long)]
    pub only_staged: bool,
}

/// Arguments for the values command
#[derive(Parser, Debug)]
pub struct ValuesArgs {
    /// Kubernetes namespace
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Deployment environment
    #[arg(short, long)]
    pub env: Option<String>,

    /// Image repository (defaults to cache.repository)
    #[arg(long)]
    pub repo: Option<String>,

    /// Render placeholder tags instead of stage signatures
    #[arg(long)]
    pub stub: bool,

    /// JSON file with secret values merged into the output
    #[arg(long)]
    pub secret_values: Option<PathBuf>,

    /// Print secret values instead of masking them
    #[arg(long, requires = "secret_values")]
    pub show_secrets: bool,
}

/// Arguments for the registry command
#[derive(Parser, Debug)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub action: RegistryAction,
}

/// Registry subcommands
#[derive(Subcommand, Debug)]
pub enum RegistryAction {
    /// Delete a whole repository (Quay)
    DeleteRepo {
        /// Repository reference (host/namespace/repository)
        reference: String,

        /// API token
        #[arg(long, env = "STAGEHAND_REGISTRY_TOKEN", hide_env_values = true)]
        token: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the merged configuration
    Show,

    /// Show configuration file paths
    Path,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}
