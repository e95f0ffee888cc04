//! Runtime factory for creating the configured container runtime

use crate::config::schema::RuntimeConfig;
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::orchestration::cli_runtime::CliRuntime;
use crate::orchestration::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Supported runtime CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Detect the runtime flavour from a binary name or path
    pub fn from_binary(binary: &str) -> Option<Self> {
        let file = binary.rsplit('/').next().unwrap_or(binary);
        match file {
            "docker" => Some(Self::Docker),
            "podman" => Some(Self::Podman),
            _ => None,
        }
    }

    /// Get a human-readable runtime name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Docker => "Docker",
            Self::Podman => "Podman",
        }
    }
}

/// Build a runtime from configuration without checking availability
pub fn runtime_from_config(config: &RuntimeConfig) -> StagehandResult<CliRuntime> {
    if RuntimeKind::from_binary(&config.binary).is_none() {
        return Err(StagehandError::ConfigInvalid {
            path: "runtime.binary".into(),
            reason: format!("unsupported runtime '{}', expected docker or podman", config.binary),
        });
    }

    Ok(CliRuntime::new(config.binary.clone())
        .with_timeout(config.timeout_secs.map(Duration::from_secs)))
}

/// Create the configured container runtime, verifying that it is installed
pub async fn create_runtime(config: &Config) -> StagehandResult<Arc<dyn ContainerRuntime>> {
    let runtime = runtime_from_config(&config.runtime)?;

    if !runtime.is_available().await? {
        return Err(StagehandError::RuntimeNotFound {
            binary: config.runtime.binary.clone(),
        });
    }

    debug!("Using {} runtime", runtime.runtime_name());
    Ok(Arc::new(runtime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_kind_from_binary() {
        assert_eq!(RuntimeKind::from_binary("docker"), Some(RuntimeKind::Docker));
        assert_eq!(RuntimeKind::from_binary("/usr/bin/podman"), Some(RuntimeKind::Podman));
        assert_eq!(RuntimeKind::from_binary("nerdctl"), None);
    }

    #[test]
    fn runtime_kind_name() {
        assert_eq!(RuntimeKind::Docker.name(), "Docker");
        assert_eq!(RuntimeKind::Podman.name(), "Podman");
    }

    #[test]
    fn unsupported_binary_is_config_error() {
        let config = RuntimeConfig {
            binary: "nerdctl".to_string(),
            timeout_secs: None,
        };
        let err = runtime_from_config(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn missing_runtime_reported() {
        let mut config = Config::default();
        config.runtime.binary = "/nonexistent/path/docker".to_string();
        let err = create_runtime(&config).await.err().unwrap();
        assert!(matches!(err, StagehandError::RuntimeNotFound { .. }));
    }
}
