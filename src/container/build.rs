//! Build container lifecycle
//!
//! A build container is created from the previous stage's image, runs the
//! accumulated shell commands through the tooling shell, and is committed
//! into a new image. It is always removed afterwards, whatever happened.
//!
//! ```text
//! Created -> Running -> Committed
//!                    \-> Failed
//! Created -> Failed   (create/start failure)
//! ```

use crate::cancel::CancelToken;
use crate::config::schema::ToolingConfig;
use crate::container::options::ContainerOptions;
use crate::error::{StagehandError, StagehandResult};
use crate::orchestration::{ContainerRuntime, ContainerSpec, ImageInspect};
use crate::stage::StageKind;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

/// Prefix of every build container name
pub const CONTAINER_NAME_PREFIX: &str = "stagehand-stage-";

/// Runtime exit codes meaning the command never ran
/// (125: runtime failed, 126: not executable, 127: not found)
const START_FAILURE_CODES: [i32; 3] = [125, 126, 127];

/// Interactive shell opened when a stage command fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntrospectMode {
    #[default]
    Off,
    /// Shell in the stage's base image, with the stage's mounts
    BeforeError,
    /// Shell in the state the failed command left behind
    Error,
}

/// Settings shared by all build containers of a conveyor
#[derive(Debug, Clone, Default)]
pub struct ContainerSettings {
    pub tooling: ToolingConfig,
    /// Prefix the composite command with `set -x`
    pub trace_commands: bool,
    pub introspect: IntrospectMode,
}

/// The image a build container starts from
#[derive(Debug, Clone)]
pub struct BaseImage {
    /// Reference used to resolve the image
    pub reference: String,
    /// Inspection result; required before committing
    pub inspect: Option<ImageInspect>,
}

impl BaseImage {
    pub fn inspected(reference: impl Into<String>, inspect: ImageInspect) -> Self {
        Self {
            reference: reference.into(),
            inspect: Some(inspect),
        }
    }

    /// Image id when inspected, otherwise the reference
    pub fn id(&self) -> &str {
        self.inspect
            .as_ref()
            .map_or(self.reference.as_str(), |i| i.id.as_str())
    }
}

/// Lifecycle state of a build container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Committed,
    Failed,
}

/// Outcome of an interactive introspection shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectOutcome {
    /// The shell ran and exited with this code
    Exited(i32),
}

/// Whether a runtime exit code means the container command could not run
pub fn is_start_container_error(code: i32) -> bool {
    START_FAILURE_CODES.contains(&code)
}

/// Encode a command so it survives any shell quoting unchanged.
///
/// The result decodes and evaluates the original command inside the container.
pub fn shellout_pack(command: &str, base64_bin: &str) -> String {
    format!(
        "eval $(echo {} | {} --decode)",
        BASE64.encode(command.as_bytes()),
        base64_bin
    )
}

/// Random container name scoped to one build attempt
fn generate_name() -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(10)
        .collect();
    format!("{}{}", CONTAINER_NAME_PREFIX, suffix)
}

/// A disposable container executing one stage
#[derive(Debug)]
pub struct BuildContainer {
    name: String,
    stage: StageKind,
    from: BaseImage,
    settings: ContainerSettings,
    state: ContainerState,
    run_commands: Vec<String>,
    service_run_commands: Vec<String>,
    run_options: ContainerOptions,
    commit_change_options: ContainerOptions,
    service_commit_change_options: ContainerOptions,
}

impl BuildContainer {
    pub fn new(stage: StageKind, from: BaseImage, settings: ContainerSettings) -> Self {
        Self {
            name: generate_name(),
            stage,
            from,
            settings,
            state: ContainerState::Created,
            run_commands: Vec::new(),
            service_run_commands: Vec::new(),
            run_options: ContainerOptions::new(),
            commit_change_options: ContainerOptions::new(),
            service_commit_change_options: ContainerOptions::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn from_image(&self) -> &BaseImage {
        &self.from
    }

    pub fn tooling(&self) -> &ToolingConfig {
        &self.settings.tooling
    }

    /// Queue user commands
    pub fn add_run_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_commands.extend(commands.into_iter().map(Into::into));
    }

    /// Queue service commands; these run before user commands
    pub fn add_service_run_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_run_commands
            .extend(commands.into_iter().map(Into::into));
    }

    pub fn user_run_commands(&self) -> &[String] {
        &self.run_commands
    }

    pub fn run_options_mut(&mut self) -> &mut ContainerOptions {
        &mut self.run_options
    }

    pub fn commit_change_options(&self) -> &ContainerOptions {
        &self.commit_change_options
    }

    pub fn commit_change_options_mut(&mut self) -> &mut ContainerOptions {
        &mut self.commit_change_options
    }

    pub fn service_commit_change_options_mut(&mut self) -> &mut ContainerOptions {
        &mut self.service_commit_change_options
    }

    /// Options imposed by the engine on every running build container
    fn service_run_options(&self) -> ContainerOptions {
        ContainerOptions {
            workdir: Some("/".to_string()),
            entrypoint: Some(vec![self.settings.tooling.bash()]),
            user: Some("0:0".to_string()),
            volumes_from: vec![self.settings.tooling.container.clone()],
            ..ContainerOptions::default()
        }
    }

    /// Service options merged with user run options.
    ///
    /// User workdir, user and entrypoint are commit-time only; the running
    /// container always uses the service values.
    pub fn prepare_run_options(&self) -> ContainerOptions {
        self.service_run_options()
            .merge(&self.run_options.without_execution_fields())
    }

    /// Commands in execution order, or the no-op binary when there are none
    pub fn prepare_run_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.settings.trace_commands {
            commands.push("set -x".to_string());
        }
        commands.extend(self.service_run_commands.iter().cloned());
        commands.extend(self.run_commands.iter().cloned());

        // `set -x` alone does not count as work
        let has_work = !self.service_run_commands.is_empty() || !self.run_commands.is_empty();
        if has_work {
            commands
        } else {
            vec![self.settings.tooling.true_bin()]
        }
    }

    /// The single packed shell command run by the container
    pub fn prepare_run_command(&self) -> String {
        shellout_pack(
            &self.prepare_run_commands().join(" && "),
            &self.settings.tooling.base64(),
        )
    }

    /// Full create specification for the build run
    pub fn prepare_run_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.name.clone(),
            image: self.from.id().to_string(),
            args: self.prepare_run_options().to_run_args(),
            command: vec!["-ec".to_string(), self.prepare_run_command()],
        }
    }

    /// Inherited < service < user commit options
    pub fn prepare_commit_options(&self) -> StagehandResult<ContainerOptions> {
        let inspect = self
            .from
            .inspect
            .as_ref()
            .ok_or_else(|| StagehandError::BaseImageNotInspected(self.from.reference.clone()))?;

        let inherited = ContainerOptions::inherited_from(&inspect.config);
        Ok(inherited.merge(
            &self
                .service_commit_change_options
                .merge(&self.commit_change_options),
        ))
    }

    pub fn prepare_commit_changes(&self) -> StagehandResult<Vec<String>> {
        Ok(self.prepare_commit_options()?.to_commit_changes())
    }

    /// Create the container and run its commands to completion
    pub async fn run(
        &mut self,
        runtime: &dyn ContainerRuntime,
        cancel: &CancelToken,
    ) -> StagehandResult<()> {
        if cancel.is_cancelled() {
            self.state = ContainerState::Failed;
            return Err(StagehandError::Cancelled);
        }

        let spec = self.prepare_run_spec();
        debug!(
            "Running {} stage in {} from {}",
            self.stage,
            self.name,
            self.from.id()
        );

        if let Err(e) = runtime.create_container(&spec).await {
            self.state = ContainerState::Failed;
            return Err(e);
        }

        self.state = ContainerState::Running;

        let code = tokio::select! {
            result = runtime.start_container(&self.name) => result,
            _ = cancel.cancelled() => {
                warn!("Cancelling {} stage, killing {}", self.stage, self.name);
                if let Err(e) = runtime.kill_container(&self.name).await {
                    warn!("Failed to kill {}: {}", self.name, e);
                }
                Err(StagehandError::Cancelled)
            }
        };

        match code {
            Ok(0) => Ok(()),
            Ok(code) => {
                self.state = ContainerState::Failed;
                Err(StagehandError::ContainerCommand {
                    stage: self.stage.to_string(),
                    name: self.name.clone(),
                    code,
                })
            }
            Err(e) => {
                self.state = ContainerState::Failed;
                Err(e)
            }
        }
    }

    /// Commit the finished container, returning the new image id
    pub async fn commit(&mut self, runtime: &dyn ContainerRuntime) -> StagehandResult<String> {
        let changes = match self.prepare_commit_changes() {
            Ok(changes) => changes,
            Err(e) => {
                self.state = ContainerState::Failed;
                return Err(e);
            }
        };

        match runtime.commit_container(&self.name, &changes).await {
            Ok(id) => {
                self.state = ContainerState::Committed;
                Ok(id)
            }
            Err(e) => {
                self.state = ContainerState::Failed;
                Err(e)
            }
        }
    }

    /// Release the container. Failures are logged, never returned.
    pub async fn rm(&self, runtime: &dyn ContainerRuntime) {
        if let Err(e) = runtime.remove_container(&self.name).await {
            warn!("Failed to remove build container {}: {}", self.name, e);
        }
    }

    /// Run, commit and remove; removal happens on every path
    pub async fn execute(
        mut self,
        runtime: &dyn ContainerRuntime,
        cancel: &CancelToken,
    ) -> StagehandResult<String> {
        let result = match self.run(runtime, cancel).await {
            Ok(()) => self.commit(runtime).await,
            Err(e @ StagehandError::ContainerCommand { .. }) => {
                self.introspect_failure(runtime).await;
                Err(e)
            }
            Err(e) => Err(e),
        };

        self.rm(runtime).await;
        result
    }

    /// Open the configured introspection shell after a failed command.
    /// Introspection problems are logged; the stage error is what matters.
    async fn introspect_failure(&self, runtime: &dyn ContainerRuntime) {
        let outcome = match self.settings.introspect {
            IntrospectMode::Off => return,
            IntrospectMode::BeforeError => self.introspect_before(runtime).await,
            IntrospectMode::Error => match runtime.commit_container(&self.name, &[]).await {
                Ok(image) => {
                    let outcome = self.introspect_after(runtime, &image).await;
                    if let Err(e) = runtime.remove_image(&image).await {
                        warn!("Failed to remove introspection image {}: {}", image, e);
                    }
                    outcome
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = outcome {
            warn!("Introspection of {} stage failed: {}", self.stage, e);
        }
    }

    /// Open an interactive shell in the base image, before the stage ran
    pub async fn introspect_before(
        &self,
        runtime: &dyn ContainerRuntime,
    ) -> StagehandResult<IntrospectOutcome> {
        self.introspect(runtime, self.from.id()).await
    }

    /// Open an interactive shell in the image this stage produced
    pub async fn introspect_after(
        &self,
        runtime: &dyn ContainerRuntime,
        image_id: &str,
    ) -> StagehandResult<IntrospectOutcome> {
        self.introspect(runtime, image_id).await
    }

    async fn introspect(
        &self,
        runtime: &dyn ContainerRuntime,
        image: &str,
    ) -> StagehandResult<IntrospectOutcome> {
        let mut args = vec!["-ti".to_string(), "--rm".to_string()];
        args.extend(self.prepare_run_options().to_run_args());
        args.push(image.to_string());
        args.push("-ec".to_string());
        args.push(self.settings.tooling.bash());

        let code = runtime.run_interactive(&args).await?;
        if is_start_container_error(code) {
            return Err(StagehandError::ContainerCouldNotStart {
                code,
                reason: format!("introspection shell in {} could not be started", image),
            });
        }

        Ok(IntrospectOutcome::Exited(code))
    }
}
