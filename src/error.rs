//! Error types for Stagehand
//!
//! All modules use `StagehandResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Stagehand operations
pub type StagehandResult<T> = Result<T, StagehandError>;

/// All errors that can occur in Stagehand
#[derive(Error, Debug)]
pub enum StagehandError {
    // Environment errors
    #[error("Container runtime not found: {binary}. Install docker or podman, or set runtime.binary")]
    RuntimeNotFound { binary: String },

    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {stage} stage of image '{image}': {reason}")]
    StageConfig {
        image: String,
        stage: String,
        reason: String,
    },

    #[error("Imported files of image '{0}' changed while its dependencies stage was prepared")]
    ImportsChanged(String),

    #[error("Image not defined in configuration: {0}")]
    ImageNotFound(String),

    #[error("Invalid glob pattern {pattern}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    // Container errors
    #[error("Failed to create container {name}: {reason}")]
    ContainerCreate { name: String, reason: String },

    #[error("{stage} stage command failed in container {name}, exit code: {code}")]
    ContainerCommand {
        stage: String,
        name: String,
        code: i32,
    },

    #[error("Failed to commit container {name}: {reason}")]
    ContainerCommit { name: String, reason: String },

    #[error("Command could not run in container (exit code {code}): {reason}")]
    ContainerCouldNotStart { code: i32, reason: String },

    #[error("Base image {0} was not inspected before committing a container built from it")]
    BaseImageNotInspected(String),

    #[error("Image not found: {0}")]
    ImageMissing(String),

    #[error("Container runtime call timed out after {timeout:?}: {operation}")]
    RuntimeTimeout { operation: String, timeout: Duration },

    #[error("Build cancelled")]
    Cancelled,

    // Git errors
    #[error("Git command failed: {command}\n{output}")]
    GitCommand { command: String, output: String },

    #[error("Timed out after {timeout:?} waiting for worktree lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    // Cache errors
    #[error("Stage cache error: {0}")]
    Cache(String),

    // Registry errors
    #[error("Invalid image reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Registry {registry} request failed: {reason}")]
    Registry { registry: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StagehandError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a stage configuration error
    pub fn stage_config(
        image: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StageConfig {
            image: image.into(),
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was reported before any container was touched
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::ConfigNotFound(_)
                | Self::StageConfig { .. }
                | Self::ImageNotFound(_)
                | Self::Glob { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RuntimeTimeout { .. } | Self::LockTimeout { .. } | Self::ContainerCreate { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeNotFound { .. } => Some("Install podman or docker and make sure it is on PATH"),
            Self::ContainerCouldNotStart { .. } => {
                Some("Check that the command exists in the image and is executable")
            }
            Self::LockTimeout { .. } => {
                Some("Another build is syncing the same repository; retry when it finishes")
            }
            Self::BaseImageNotInspected(_) => Some("This is a bug; please report it"),
            Self::ImportsChanged(_) => Some("Run the build again once the project files stop changing"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StagehandError::ContainerCommand {
            stage: "install".to_string(),
            name: "stagehand-stage-abc".to_string(),
            code: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("install stage"));
        assert!(msg.contains("stagehand-stage-abc"));
        assert!(msg.contains("exit code: 2"));
    }

    #[test]
    fn error_hint() {
        let err = StagehandError::ContainerCouldNotStart {
            code: 127,
            reason: "not found".to_string(),
        };
        assert!(err.hint().is_some());
        assert_eq!(StagehandError::Cancelled.hint(), None);
    }

    #[test]
    fn error_retryable() {
        assert!(StagehandError::RuntimeTimeout {
            operation: "commit".to_string(),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!StagehandError::BaseImageNotInspected("alpine".to_string()).is_retryable());
    }

    #[test]
    fn configuration_errors_classified() {
        assert!(StagehandError::stage_config("app", "from", "missing base image").is_configuration());
        assert!(!StagehandError::Cancelled.is_configuration());
    }
}
