//! Docker/Podman CLI container runtime
//!
//! Implements the ContainerRuntime trait by shelling out to the runtime
//! binary. Both CLIs accept the same subset of commands used here.

use crate::error::{StagehandError, StagehandResult};
use crate::orchestration::podman::{parse_image_inspect, ContainerSpec, ImageInspect};
use crate::orchestration::runtime::ContainerRuntime;
use crate::orchestration::{build_error_output, stream_child_output};
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Container runtime driving the docker or podman CLI
pub struct CliRuntime {
    binary: String,
    timeout: Option<Duration>,
}

impl CliRuntime {
    /// Create a runtime for the given binary ("docker", "podman" or a path)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Bound every runtime call by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> StagehandResult<T>
    where
        F: Future<Output = StagehandResult<T>>,
    {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                StagehandError::RuntimeTimeout {
                    operation: operation.to_string(),
                    timeout,
                }
            })?,
            None => fut.await,
        }
    }

    /// Execute a runtime command and return the output
    async fn exec(&self, args: &[&str]) -> StagehandResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        let fut = async {
            Command::new(&self.binary)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| StagehandError::command_failed(format!("{} {:?}", self.binary, args), e))
        };

        self.bounded(args.first().copied().unwrap_or_default(), fut)
            .await
    }

    /// Execute a runtime command, failing on non-zero exit
    async fn exec_checked(&self, args: &[&str]) -> StagehandResult<String> {
        let output = self.exec(args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(StagehandError::command_exec(
                format!("{} {}", self.binary, args.join(" ")),
                stderr.trim(),
            ))
        }
    }

    /// Execute a runtime command interactively
    async fn exec_interactive(&self, args: &[String]) -> StagehandResult<i32> {
        debug!("Executing interactively: {} {:?}", self.binary, args);

        let status = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| StagehandError::command_failed(format!("{} {:?}", self.binary, args), e))?;

        Ok(status.code().unwrap_or(-1))
    }
}

/// Docker says "No such image", podman says "image not known"
fn is_missing_image(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such image") || stderr.contains("image not known")
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn is_available(&self) -> StagehandResult<bool> {
        Ok(Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String> {
        let args = spec.create_args();
        debug!("Creating container: {} {:?}", self.binary, args);

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!(
                "Container created: {} ({})",
                spec.name,
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            Err(StagehandError::ContainerCreate {
                name: spec.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn start_container(&self, name: &str) -> StagehandResult<i32> {
        debug!("Starting container attached: {}", name);

        let fut = async {
            let mut child = Command::new(&self.binary)
                .args(["start", "--attach", name])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| StagehandError::command_failed(format!("{} start", self.binary), e))?;

            let container = name.to_string();
            let lines = stream_child_output(&mut child, &move |line| {
                info!(target: "stagehand::build", "[{}] {}", container, line);
            })
            .await;

            let status = child
                .wait()
                .await
                .map_err(|e| StagehandError::command_failed(format!("{} start", self.binary), e))?;

            let code = status.code().unwrap_or(-1);
            if code != 0 {
                debug!(
                    "Container {} exited with {}:\n{}",
                    name,
                    code,
                    build_error_output(&lines.join("\n"), "")
                );
            }
            Ok(code)
        };

        self.bounded("start", fut).await
    }

    async fn commit_container(&self, name: &str, changes: &[String]) -> StagehandResult<String> {
        let mut args = vec!["commit".to_string()];
        for change in changes {
            args.push("--change".to_string());
            args.push(change.clone());
        }
        args.push(name.to_string());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            let image_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!("Committed {} as {}", name, image_id);
            Ok(image_id)
        } else {
            Err(StagehandError::ContainerCommit {
                name: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn remove_container(&self, name: &str) -> StagehandResult<()> {
        debug!("Removing container: {}", name);

        let output = self.exec(&["rm", "-f", name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no such container") {
                Ok(())
            } else {
                Err(StagehandError::command_exec(
                    format!("{} rm", self.binary),
                    stderr,
                ))
            }
        }
    }

    async fn kill_container(&self, name: &str) -> StagehandResult<()> {
        debug!("Killing container: {}", name);
        self.exec_checked(&["kill", name]).await.map(|_| ())
    }

    async fn create_tooling_container(&self, name: &str, image: &str) -> StagehandResult<()> {
        info!("Creating tooling container {} from {}", name, image);

        let name_arg = format!("--name={}", name);
        let output = self.exec(&["create", &name_arg, image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StagehandError::ContainerCreate {
                name: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn container_exists(&self, name: &str) -> StagehandResult<bool> {
        let output = self.exec(&["container", "inspect", name]).await?;
        Ok(output.status.success())
    }

    async fn inspect_image(&self, image: &str) -> StagehandResult<Option<ImageInspect>> {
        let output = self.exec(&["image", "inspect", image]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_image(&stderr) {
                return Ok(None);
            }
            return Err(StagehandError::command_exec(
                format!("{} image inspect {}", self.binary, image),
                stderr.trim(),
            ));
        }

        Ok(parse_image_inspect(&String::from_utf8_lossy(&output.stdout))?)
    }

    async fn remove_image(&self, image: &str) -> StagehandResult<()> {
        debug!("Removing image: {}", image);

        let output = self.exec(&["rmi", image]).await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_image(&stderr) {
            Ok(())
        } else {
            Err(StagehandError::command_exec(
                format!("{} rmi {}", self.binary, image),
                stderr.trim(),
            ))
        }
    }

    async fn pull_image(&self, image: &str) -> StagehandResult<()> {
        info!("Pulling image: {}", image);

        let output = self.exec(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StagehandError::command_exec(
                format!("{} pull {}", self.binary, image),
                build_error_output(
                    &String::from_utf8_lossy(&output.stdout),
                    &String::from_utf8_lossy(&output.stderr),
                ),
            ))
        }
    }

    async fn tag_image(&self, image: &str, tag: &str) -> StagehandResult<()> {
        debug!("Tagging {} as {}", image, tag);
        self.exec_checked(&["tag", image, tag]).await.map(|_| ())
    }

    async fn run_interactive(&self, args: &[String]) -> StagehandResult<i32> {
        let mut full = vec!["run".to_string()];
        full.extend(args.iter().cloned());
        self.exec_interactive(&full).await
    }

    fn runtime_name(&self) -> &'static str {
        if self.binary.ends_with("podman") {
            "Podman"
        } else {
            "Docker"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_name_from_binary() {
        assert_eq!(CliRuntime::new("podman").runtime_name(), "Podman");
        assert_eq!(CliRuntime::new("/usr/bin/podman").runtime_name(), "Podman");
        assert_eq!(CliRuntime::new("docker").runtime_name(), "Docker");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let runtime = CliRuntime::new("stagehand-no-such-runtime-binary");
        assert!(!runtime.is_available().await.unwrap());
    }

    #[test]
    fn missing_image_messages() {
        assert!(is_missing_image("Error: No such image: alpine:nope"));
        assert!(is_missing_image("Error: alpine:nope: image not known"));
        assert!(!is_missing_image(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
        ));
    }

    #[tokio::test]
    async fn inspect_failure_is_an_error() {
        // `false` exits non-zero without saying the image is missing
        let runtime = CliRuntime::new("false");
        let err = runtime.inspect_image("alpine:3.18").await.unwrap_err();
        assert!(matches!(err, StagehandError::CommandExecution { .. }));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let runtime = CliRuntime::new("sleep").with_timeout(Some(Duration::from_millis(50)));
        let err = runtime.exec(&["5"]).await.unwrap_err();
        assert!(matches!(err, StagehandError::RuntimeTimeout { .. }));
    }
}
