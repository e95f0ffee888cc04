//! Container runtime abstraction
//!
//! Provides a trait for the container operations the build engine needs,
//! implemented by the docker/podman CLI backend and by test doubles.

use crate::error::StagehandResult;
use crate::orchestration::podman::{ContainerSpec, ImageInspect};
use async_trait::async_trait;

/// Abstract container runtime interface
///
/// Executing a command in a build container is `create_container` with the
/// command baked into the `ContainerSpec`, followed by an attached `start_container`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> StagehandResult<bool>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String>;

    /// Start a created container attached and wait for it, returning the exit code
    async fn start_container(&self, name: &str) -> StagehandResult<i32>;

    /// Commit a container into a new image with `--change` instructions
    async fn commit_container(&self, name: &str, changes: &[String]) -> StagehandResult<String>;

    /// Remove a container (missing containers are not an error)
    async fn remove_container(&self, name: &str) -> StagehandResult<()>;

    /// Kill a running container immediately
    async fn kill_container(&self, name: &str) -> StagehandResult<()>;

    /// Create the long-lived tooling container whose volumes build containers mount
    async fn create_tooling_container(&self, name: &str, image: &str) -> StagehandResult<()>;

    /// Check whether a container with this name exists
    async fn container_exists(&self, name: &str) -> StagehandResult<bool>;

    /// Inspect an image; `None` if it does not exist locally
    async fn inspect_image(&self, image: &str) -> StagehandResult<Option<ImageInspect>>;

    /// Pull an image from its registry
    async fn pull_image(&self, image: &str) -> StagehandResult<()>;

    /// Remove a local image; succeeds if it is already gone
    async fn remove_image(&self, image: &str) -> StagehandResult<()>;

    /// Add a tag to an existing image
    async fn tag_image(&self, image: &str, tag: &str) -> StagehandResult<()>;

    /// Run `<runtime> run <args>` attached to the terminal, returning the exit code
    async fn run_interactive(&self, args: &[String]) -> StagehandResult<i32>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
