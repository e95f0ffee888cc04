//! Build stages
//!
//! An image is built as a fixed chain of stages. Each stage contributes the
//! inputs of its signature and knows how to mutate a fresh build container
//! into its output image. Stages whose configuration is absent are skipped;
//! `From` is always present.

mod dependencies;
mod docker_instructions;
mod from;
mod git_archive;
mod script;

pub use dependencies::{collect_import_files, DependenciesStage, ImportFiles};
pub use docker_instructions::DockerInstructionsStage;
pub use from::FromStage;
pub use git_archive::GitArchiveStage;
pub use script::ScriptStage;

use crate::config::schema::ImageConfig;
use crate::container::BuildContainer;
use crate::error::{StagehandError, StagehandResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Mount point of the project directory in dependency-copy containers
pub const CONTEXT_MOUNT: &str = "/.stagehand/context";

/// Mount point of the per-build scratch directory (archives, file lists)
pub const SCRATCH_MOUNT: &str = "/.stagehand/scratch";

/// Stage kinds in build order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    From,
    BeforeInstall,
    Dependencies,
    GitArchive,
    Install,
    BeforeSetup,
    Setup,
    DockerInstructions,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::From,
        StageKind::BeforeInstall,
        StageKind::Dependencies,
        StageKind::GitArchive,
        StageKind::Install,
        StageKind::BeforeSetup,
        StageKind::Setup,
        StageKind::DockerInstructions,
    ];

    /// Stable name, hashed into signatures
    pub fn name(&self) -> &'static str {
        match self {
            Self::From => "from",
            Self::BeforeInstall => "before_install",
            Self::Dependencies => "dependencies",
            Self::GitArchive => "git_archive",
            Self::Install => "install",
            Self::BeforeSetup => "before_setup",
            Self::Setup => "setup",
            Self::DockerInstructions => "docker_instructions",
        }
    }

    /// Kinds driven by user shell commands
    pub fn is_script(&self) -> bool {
        matches!(
            self,
            Self::BeforeInstall | Self::Install | Self::BeforeSetup | Self::Setup
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-image inputs available to stages
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub image_name: String,
    /// Host directory imports are resolved against
    pub project_dir: PathBuf,
    /// Repository (or synced worktree) git commands run in
    pub git_repo: Option<PathBuf>,
    /// Commit the image is built from
    pub source_commit: Option<String>,
    /// Host scratch directory owned by this image build
    pub scratch_dir: PathBuf,
    /// Id of the resolved base image
    pub base_image_id: Option<String>,
}

impl BuildContext {
    pub fn new(image_name: impl Into<String>, project_dir: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            image_name: image_name.into(),
            project_dir,
            git_repo: None,
            source_commit: None,
            scratch_dir,
            base_image_id: None,
        }
    }

    pub fn with_git(mut self, repo: PathBuf, commit: impl Into<String>) -> Self {
        self.git_repo = Some(repo);
        self.source_commit = Some(commit.into());
        self
    }

    /// Repository and commit, or a configuration error naming the stage
    pub(crate) fn require_git(&self, stage: StageKind) -> StagehandResult<(&Path, &str)> {
        match (&self.git_repo, &self.source_commit) {
            (Some(repo), Some(commit)) => Ok((repo.as_path(), commit.as_str())),
            _ => Err(StagehandError::stage_config(
                &self.image_name,
                stage.name(),
                "stage needs a git repository but the project is not inside one",
            )),
        }
    }
}

/// One stage of an image
#[derive(Debug, Clone)]
pub enum Stage {
    From(FromStage),
    Script(ScriptStage),
    Dependencies(DependenciesStage),
    GitArchive(GitArchiveStage),
    DockerInstructions(DockerInstructionsStage),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::From(_) => StageKind::From,
            Self::Script(stage) => stage.kind(),
            Self::Dependencies(_) => StageKind::Dependencies,
            Self::GitArchive(_) => StageKind::GitArchive,
            Self::DockerInstructions(_) => StageKind::DockerInstructions,
        }
    }

    /// Signature inputs contributed by this stage
    pub async fn dependencies(&self, ctx: &BuildContext) -> StagehandResult<Vec<String>> {
        match self {
            Self::From(stage) => Ok(stage.dependencies(ctx)),
            Self::Script(stage) => stage.dependencies(ctx).await,
            Self::Dependencies(stage) => stage.dependencies(ctx).await,
            Self::GitArchive(stage) => stage.dependencies(ctx),
            Self::DockerInstructions(stage) => Ok(stage.dependencies()),
        }
    }

    /// Configure a fresh build container to produce this stage's image.
    ///
    /// `inputs` are the signature inputs the stage's signature was computed from.
    pub async fn prepare_image(
        &self,
        ctx: &BuildContext,
        inputs: &[String],
        container: &mut BuildContainer,
    ) -> StagehandResult<()> {
        match self {
            Self::From(_) => Ok(()),
            Self::Script(stage) => {
                stage.prepare_image(container);
                Ok(())
            }
            Self::Dependencies(stage) => stage.prepare_image(ctx, inputs, container).await,
            Self::GitArchive(stage) => stage.prepare_image(ctx, container).await,
            Self::DockerInstructions(stage) => {
                stage.prepare_image(container);
                Ok(())
            }
        }
    }

    /// Check the stage's configuration without touching the runtime
    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        match self {
            Self::From(stage) => stage.validate(image),
            Self::Script(stage) => stage.validate(image),
            Self::Dependencies(stage) => stage.validate(image),
            Self::GitArchive(stage) => stage.validate(image),
            Self::DockerInstructions(stage) => stage.validate(image),
        }
    }
}

/// The stage chain of an image, in build order
pub fn image_stages(image: &ImageConfig) -> Vec<Stage> {
    let shell = &image.shell;
    let script = |kind: StageKind, commands: &Vec<String>| {
        (!commands.is_empty()).then(|| {
            Stage::Script(ScriptStage::new(
                kind,
                commands.clone(),
                shell.dependencies.get(kind.name()).cloned().unwrap_or_default(),
            ))
        })
    };

    let mut stages = vec![Stage::From(FromStage::new(image.from.clone()))];
    stages.extend(script(StageKind::BeforeInstall, &shell.before_install));
    if !image.imports.is_empty() {
        stages.push(Stage::Dependencies(DependenciesStage::new(
            image.imports.clone(),
        )));
    }
    if !image.git.is_empty() {
        stages.push(Stage::GitArchive(GitArchiveStage::new(image.git.clone())));
    }
    stages.extend(script(StageKind::Install, &shell.install));
    stages.extend(script(StageKind::BeforeSetup, &shell.before_setup));
    stages.extend(script(StageKind::Setup, &shell.setup));
    if let Some(docker) = &image.docker {
        stages.push(Stage::DockerInstructions(DockerInstructionsStage::new(
            docker.clone(),
        )));
    }

    stages
}

/// Build and validate the stage chain of an image
pub fn validate_image(image: &ImageConfig) -> StagehandResult<Vec<Stage>> {
    for (phase, paths) in &image.shell.dependencies {
        let kind = StageKind::from_name(phase).filter(StageKind::is_script).ok_or_else(|| {
            StagehandError::stage_config(
                &image.name,
                phase,
                "git dependencies can only be declared for before_install, install, before_setup or setup",
            )
        })?;

        if paths.is_empty() {
            continue;
        }
        let has_commands = match kind {
            StageKind::BeforeInstall => !image.shell.before_install.is_empty(),
            StageKind::Install => !image.shell.install.is_empty(),
            StageKind::BeforeSetup => !image.shell.before_setup.is_empty(),
            _ => !image.shell.setup.is_empty(),
        };
        if !has_commands {
            return Err(StagehandError::stage_config(
                &image.name,
                phase,
                "git dependencies declared for a stage without commands",
            ));
        }
    }

    let stages = image_stages(image);
    for stage in &stages {
        stage.validate(&image.name)?;
    }
    Ok(stages)
}

/// Single-quote a word for the container shell
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Compile glob patterns; `None` when there are none
pub(crate) fn build_globset(patterns: &[String]) -> StagehandResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| StagehandError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|source| StagehandError::Glob {
            pattern: patterns.join(", "),
            source,
        })
}

/// Relative source path without parent components
pub(crate) fn check_source_path(
    image: &str,
    stage: StageKind,
    path: &str,
) -> StagehandResult<()> {
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(StagehandError::stage_config(
            image,
            stage.name(),
            format!("source path '{}' must not contain '..'", path),
        ));
    }
    Ok(())
}

/// Absolute destination path inside the image
pub(crate) fn check_destination(image: &str, stage: StageKind, to: &str) -> StagehandResult<()> {
    if !to.starts_with('/') {
        return Err(StagehandError::stage_config(
            image,
            stage.name(),
            format!("destination '{}' must be an absolute path", to),
        ));
    }
    Ok(())
}

/// Append a list with its length so neighbouring lists cannot shift into each other
pub(crate) fn push_list(inputs: &mut crate::signature::SignatureInputs, values: &[String]) {
    inputs.push(values.len().to_string());
    inputs.extend(values.iter().cloned());
}

/// `chown` argument for optional owner and group
pub(crate) fn chown_spec(owner: Option<&str>, group: Option<&str>) -> Option<String> {
    match (owner, group) {
        (None, None) => None,
        (Some(owner), None) => Some(owner.to_string()),
        (None, Some(group)) => Some(format!(":{}", group)),
        (Some(owner), Some(group)) => Some(format!("{}:{}", owner, group)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DockerConfig, GitMappingConfig, ImportConfig, ShellConfig};

    fn image(shell: ShellConfig) -> ImageConfig {
        ImageConfig {
            name: "app".to_string(),
            from: "alpine:3.18".to_string(),
            shell,
            ..Default::default()
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(StageKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(StageKind::From.name(), "from");
        assert_eq!(StageKind::DockerInstructions.to_string(), "docker_instructions");
    }

    #[test]
    fn absent_stages_are_skipped() {
        let stages = image_stages(&image(ShellConfig {
            setup: vec!["echo hi > /f".to_string()],
            ..Default::default()
        }));
        let kinds: Vec<_> = stages.iter().map(Stage::kind).collect();
        assert_eq!(kinds, vec![StageKind::From, StageKind::Setup]);
    }

    #[test]
    fn full_chain_order() {
        let mut config = image(ShellConfig {
            before_install: vec!["a".to_string()],
            install: vec!["b".to_string()],
            before_setup: vec!["c".to_string()],
            setup: vec!["d".to_string()],
            ..Default::default()
        });
        config.imports.push(ImportConfig {
            add: "config".to_string(),
            to: "/etc/app".to_string(),
            ..Default::default()
        });
        config.git.push(GitMappingConfig {
            add: "/".to_string(),
            to: "/app".to_string(),
            ..Default::default()
        });
        config.docker = Some(DockerConfig::default());

        let kinds: Vec<_> = image_stages(&config).iter().map(Stage::kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }

    #[test]
    fn unknown_dependency_phase_rejected() {
        let mut shell = ShellConfig {
            install: vec!["make".to_string()],
            ..Default::default()
        };
        shell
            .dependencies
            .insert("instal".to_string(), vec!["Makefile".to_string()]);

        let err = validate_image(&image(shell)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn dependencies_without_commands_rejected() {
        let mut shell = ShellConfig::default();
        shell
            .dependencies
            .insert("setup".to_string(), vec!["Makefile".to_string()]);

        assert!(validate_image(&image(shell)).is_err());
    }

    #[test]
    fn empty_base_image_rejected() {
        let mut config = image(ShellConfig::default());
        config.from = String::new();
        assert!(validate_image(&config).is_err());
    }

    #[test]
    fn shell_quoting() {
        assert_eq!(shell_quote("/app/src"), "/app/src");
        assert_eq!(shell_quote("my file"), "'my file'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn chown_specs() {
        assert_eq!(chown_spec(None, None), None);
        assert_eq!(chown_spec(Some("app"), None).as_deref(), Some("app"));
        assert_eq!(chown_spec(None, Some("www")).as_deref(), Some(":www"));
        assert_eq!(chown_spec(Some("app"), Some("www")).as_deref(), Some("app:www"));
    }

    #[test]
    fn bad_glob_reported() {
        let err = build_globset(&["a/[".to_string()]).unwrap_err();
        assert!(matches!(err, StagehandError::Glob { .. }));
    }
}
