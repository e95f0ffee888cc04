//! Configuration schema for Stagehand
//!
//! User defaults live at `~/.config/stagehand/config.toml`; the project file
//! `stagehand.toml` sits at the repository root and declares the images.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Project identity
    pub project: ProjectConfig,

    /// Container runtime settings
    pub runtime: RuntimeConfig,

    /// Service tooling mounted into every build container
    pub tooling: ToolingConfig,

    /// Stage cache settings
    pub cache: CacheConfig,

    /// Git worktree synchronization settings
    pub git: GitConfig,

    /// Image definitions, built in declaration order
    #[serde(rename = "image", skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageConfig>,
}

impl Config {
    /// Look up an image definition by name
    pub fn image(&self, name: &str) -> Option<&ImageConfig> {
        self.images.iter().find(|image| image.name == name)
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Decorate image names in progress output
    pub pretty_log: bool,

    /// Prefix build commands with `set -x`
    /// (also enabled by `STAGEHAND_TRACE_COMMANDS=1`)
    pub trace_commands: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            pretty_log: true,
            trace_commands: false,
        }
    }
}

/// Project identity used for image naming and chart values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name (defaults to the project directory name)
    pub name: Option<String>,

    /// Project root; defaults to the directory holding stagehand.toml
    pub dir: Option<PathBuf>,
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime CLI binary ("docker" or "podman")
    pub binary: String,

    /// Timeout applied around each runtime call (unset = no timeout)
    pub timeout_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            timeout_secs: None,
        }
    }
}

/// Service tooling container configuration
///
/// The tooling image ships static `bash`, `base64`, `true`, `tar` and the
/// coreutils (`mkdir`, `cp`, `chown`) under `bin_dir`. Its container is
/// attached to every build container with `--volumes-from`, so builds never
/// depend on the target image's shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolingConfig {
    /// Image providing the tooling volume
    pub image: String,

    /// Name of the long-lived tooling container
    pub container: String,

    /// Directory of tooling binaries inside build containers
    pub bin_dir: String,
}

impl Default for ToolingConfig {
    fn default() -> Self {
        Self {
            image: "ghcr.io/stagehand-build/tooling:0.3".to_string(),
            container: "stagehand-tooling-0.3".to_string(),
            bin_dir: "/.stagehand/bin".to_string(),
        }
    }
}

impl ToolingConfig {
    /// Path of a tooling binary inside build containers
    pub fn bin(&self, name: &str) -> String {
        format!("{}/{}", self.bin_dir.trim_end_matches('/'), name)
    }

    pub fn bash(&self) -> String {
        self.bin("bash")
    }

    pub fn base64(&self) -> String {
        self.bin("base64")
    }

    pub fn true_bin(&self) -> String {
        self.bin("true")
    }

    pub fn tar(&self) -> String {
        self.bin("tar")
    }
}

/// Stage cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Tags in the local container runtime (persistent)
    Runtime,
    /// Process-local map (nothing survives the process)
    Memory,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend storing signature -> image id
    pub backend: CacheBackend,

    /// Repository name used to tag stage images
    pub repository: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Runtime,
            repository: "stagehand-stages".to_string(),
        }
    }
}

/// Git worktree synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Build from local changes on top of HEAD instead of HEAD itself
    pub dev: bool,

    /// Only staged changes are synced in dev mode
    pub only_staged_changes: bool,

    /// Worktree cache root (defaults to the user cache dir)
    pub worktree_cache_dir: Option<PathBuf>,

    /// How long to wait for another process's worktree lock
    pub lock_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            dev: false,
            only_staged_changes: false,
            worktree_cache_dir: None,
            lock_timeout_secs: 600,
        }
    }
}

/// One image definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Image name; empty for the single nameless image of a project
    pub name: String,

    /// Base image reference
    pub from: String,

    /// Shell stages
    pub shell: ShellConfig,

    /// Host files copied into the image
    #[serde(rename = "import", skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportConfig>,

    /// Repository paths added from the source commit
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub git: Vec<GitMappingConfig>,

    /// Docker metadata applied to the final image
    pub docker: Option<DockerConfig>,
}

/// User script stages, run in this order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub before_install: Vec<String>,
    pub install: Vec<String>,
    pub before_setup: Vec<String>,
    pub setup: Vec<String>,

    /// Repository paths (git pathspecs) whose contents invalidate a phase,
    /// keyed by phase name
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// A host file import (dependency-copy stage)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Source path relative to the project directory
    pub add: String,

    /// Absolute destination inside the image
    pub to: String,

    /// Globs (relative to `add`) selecting files; empty = everything
    pub include_paths: Vec<String>,

    /// Globs (relative to `add`) removing files from the selection
    pub exclude_paths: Vec<String>,

    pub owner: Option<String>,
    pub group: Option<String>,
}

/// A repository path mapping (git archive stage)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitMappingConfig {
    /// Repository path to archive ("/" = whole repository)
    pub add: String,

    /// Absolute destination inside the image
    pub to: String,

    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// Docker metadata instructions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub volume: Vec<String>,
    pub expose: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub label: BTreeMap<String, String>,
    pub cmd: Vec<String>,
    pub onbuild: Vec<String>,
    pub entrypoint: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub stop_signal: Option<String>,
    pub healthcheck: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[runtime]"));
        assert!(!toml.contains("[[image]]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.binary, "docker");
        assert_eq!(config.cache.backend, CacheBackend::Runtime);
        assert!(config.images.is_empty());
    }

    #[test]
    fn config_deserializes_images() {
        let toml = r#"
            [runtime]
            binary = "podman"

            [[image]]
            name = "app"
            from = "alpine:3.18"

            [image.shell]
            install = ["apk add --no-cache curl"]
            setup = ["echo hi > /f"]

            [image.shell.dependencies]
            install = ["package.json"]

            [[image.import]]
            add = "config"
            to = "/etc/app"
            include_paths = ["**/*.yaml"]

            [[image.git]]
            add = "/"
            to = "/app"

            [image.docker]
            workdir = "/app"
            env = { B = "2", A = "1" }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.binary, "podman");

        let image = config.image("app").unwrap();
        assert_eq!(image.from, "alpine:3.18");
        assert_eq!(image.shell.install, vec!["apk add --no-cache curl"]);
        assert_eq!(image.shell.dependencies["install"], vec!["package.json"]);
        assert_eq!(image.imports[0].to, "/etc/app");
        assert_eq!(image.git[0].to, "/app");

        let docker = image.docker.as_ref().unwrap();
        assert_eq!(docker.workdir.as_deref(), Some("/app"));
        let keys: Vec<_> = docker.env.keys().collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn tooling_paths() {
        let tooling = ToolingConfig::default();
        assert_eq!(tooling.bash(), "/.stagehand/bin/bash");
        assert_eq!(tooling.base64(), "/.stagehand/bin/base64");
        assert_eq!(tooling.true_bin(), "/.stagehand/bin/true");
    }
}
