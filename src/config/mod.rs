//! Configuration management for Stagehand

pub mod schema;

pub use schema::Config;

use crate::error::{StagehandError, StagehandResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Project configuration file name, discovered upward from the working directory
pub const PROJECT_CONFIG_FILE: &str = "stagehand.toml";

/// Environment toggle for command tracing inside build containers
pub const TRACE_COMMANDS_ENV: &str = "STAGEHAND_TRACE_COMMANDS";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagehand")
            .join("config.toml")
    }

    /// Get the cache directory path
    pub fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagehand")
    }

    /// Default root for worktree cache entries
    pub fn worktrees_dir() -> PathBuf {
        Self::cache_dir().join("worktrees")
    }

    /// Scratch space for build inputs handed to containers (git archives)
    pub fn build_tmp_dir() -> PathBuf {
        Self::cache_dir().join("tmp")
    }

    /// Find `stagehand.toml` in `start` or any of its ancestors
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> StagehandResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StagehandResult<Config> {
        let value = Self::read_table(path).await?;
        Self::deserialize(value, path)
    }

    /// Load user config overlaid with a project config.
    ///
    /// Tables are merged key by key, project values winning. The project
    /// directory defaults to the directory holding the project file, and
    /// `STAGEHAND_TRACE_COMMANDS=1` forces command tracing on.
    pub async fn load_merged(&self, local: Option<&Path>) -> StagehandResult<Config> {
        let mut merged = if self.config_path.exists() {
            Self::read_table(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        if let Some(local) = local {
            let overlay = Self::read_table(local).await?;
            merge_values(&mut merged, overlay);
        }

        let source = local.unwrap_or(&self.config_path);
        let mut config = Self::deserialize(merged, source)?;

        if config.project.dir.is_none() {
            config.project.dir = local.and_then(Path::parent).map(Path::to_path_buf);
        }

        if trace_commands_from_env() {
            config.general.trace_commands = true;
        }

        Ok(config)
    }

    async fn read_table(path: &Path) -> StagehandResult<toml::Value> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            StagehandError::io(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| StagehandError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn deserialize(value: toml::Value, path: &Path) -> StagehandResult<Config> {
        value.try_into().map_err(|e: toml::de::Error| StagehandError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StagehandResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StagehandError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StagehandResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StagehandError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure all cache directories exist
    pub async fn ensure_cache_dirs() -> StagehandResult<()> {
        let dirs = [
            Self::cache_dir(),
            Self::worktrees_dir(),
            Self::build_tmp_dir(),
        ];

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                StagehandError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn trace_commands_from_env() -> bool {
    std::env::var(TRACE_COMMANDS_ENV).is_ok_and(|v| v == "1" || v == "true")
}

/// Recursively overlay `overlay` onto `base`; non-table values replace
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
