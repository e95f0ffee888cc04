//! Project resolution shared by the build commands

use crate::cache::create_cache;
use crate::cancel::CancelToken;
use crate::config::schema::ImageConfig;
use crate::config::{Config, ConfigManager, PROJECT_CONFIG_FILE};
use crate::container::{ContainerSettings, IntrospectMode};
use crate::conveyor::{Conveyor, StageReport};
use crate::error::{StagehandError, StagehandResult};
use crate::git::{self, Repository, SyncOptions};
use crate::logging::{image_log_name, LogFormat};
use crate::orchestration::create_runtime;
use crate::stage::BuildContext;
use console::style;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where images are built from
#[derive(Debug)]
pub(crate) struct Project {
    pub name: String,
    pub dir: PathBuf,
    /// Repository worktree and source commit
    pub git: Option<(PathBuf, String)>,
}

impl Project {
    /// One build job per image, each with its own scratch directory
    pub fn jobs(
        &self,
        images: &[&ImageConfig],
        scratch_root: &Path,
    ) -> Vec<(ImageConfig, BuildContext)> {
        images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let ctx = BuildContext::new(
                    image.name.clone(),
                    self.dir.clone(),
                    scratch_root.join(format!("image-{}", i)),
                );
                let ctx = match &self.git {
                    Some((repo, commit)) => ctx.with_git(repo.clone(), commit.clone()),
                    None => ctx,
                };
                ((*image).clone(), ctx)
            })
            .collect()
    }
}

/// The images named on the command line, or all of them
pub(crate) fn select_images<'a>(
    config: &'a Config,
    names: &[String],
) -> StagehandResult<Vec<&'a ImageConfig>> {
    if config.images.is_empty() {
        return Err(StagehandError::ConfigInvalid {
            path: PROJECT_CONFIG_FILE.into(),
            reason: "no [[image]] declared".to_string(),
        });
    }
    if names.is_empty() {
        return Ok(config.images.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            config
                .image(name)
                .ok_or_else(|| StagehandError::ImageNotFound(name.clone()))
        })
        .collect()
}

/// Locate the project and the commit to build from.
///
/// In dev mode the commit is the synthetic commit of HEAD plus local changes.
pub(crate) async fn resolve_project(config: &Config, dev: bool) -> StagehandResult<Project> {
    let dir = match &config.project.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| StagehandError::io("getting current directory", e))?,
    };
    let name = config
        .project
        .name
        .clone()
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "project".to_string());

    let repo = if git::is_git_available().await {
        git::discover_repository(&dir).await?
    } else {
        debug!("git not available, building without repository stages");
        None
    };

    let git = match repo {
        None => None,
        Some(repo) => match git::rev_parse(&repo.worktree, "HEAD").await {
            Ok(head) => {
                let commit = if dev || config.git.dev {
                    sync_dev_commit(config, &repo, &head, config.git.only_staged_changes).await?
                } else {
                    head
                };
                Some((repo.worktree, commit))
            }
            Err(StagehandError::GitCommand { .. }) => {
                warn!("Repository {} has no commits yet", repo.worktree.display());
                None
            }
            Err(e) => return Err(e),
        },
    };

    if let Some((_, commit)) = &git {
        info!("Building {} from commit {}", name, commit);
    }
    Ok(Project { name, dir, git })
}

/// Synthetic commit of `commit` plus the local changes of `repo`
pub(crate) async fn sync_dev_commit(
    config: &Config,
    repo: &Repository,
    commit: &str,
    only_staged_changes: bool,
) -> StagehandResult<String> {
    let root = config
        .git
        .worktree_cache_dir
        .clone()
        .unwrap_or_else(ConfigManager::worktrees_dir);
    let cache_dir = git::worktree_cache_dir(&root, &repo.git_dir)?;
    let opts = SyncOptions {
        only_staged_changes,
        lock_timeout: Duration::from_secs(config.git.lock_timeout_secs),
    };

    git::sync_source_worktree(&repo.git_dir, &repo.worktree, &cache_dir, commit, &opts).await
}

/// Conveyor over the configured runtime and cache
pub(crate) async fn conveyor(
    config: &Config,
    cancel: CancelToken,
    introspect: IntrospectMode,
) -> StagehandResult<Conveyor> {
    let runtime = create_runtime(config).await?;
    let cache = create_cache(&config.cache, runtime.clone());
    debug!("Using {} stage cache", cache.backend_name());

    Ok(Conveyor::new(runtime, cache)
        .with_settings(ContainerSettings {
            tooling: config.tooling.clone(),
            trace_commands: config.general.trace_commands,
            introspect,
        })
        .with_log_format(LogFormat::from_config(&config.general))
        .with_cancel(cancel))
}

/// Remove a build's scratch directory; failures are only logged
pub(crate) async fn remove_scratch(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    &id[..id.len().min(12)]
}

/// Print stage reports as a table
pub(crate) fn print_stage_table(images: &[(&str, &[StageReport])]) {
    println!(
        "{:<16} {:<20} {:<14} {:<8} {:<14}",
        style("IMAGE").bold(),
        style("STAGE").bold(),
        style("SIGNATURE").bold(),
        style("STATUS").bold(),
        style("IMAGE ID").bold()
    );
    println!("{}", "-".repeat(76));

    for (name, stages) in images {
        for stage in stages.iter() {
            let status = match (&stage.image_id, stage.cached) {
                (Some(_), true) => style("cached").green(),
                (Some(_), false) => style("built").cyan(),
                (None, _) => style("pending").yellow(),
            };
            println!(
                "{:<16} {:<20} {:<14} {:<8} {:<14}",
                image_log_name(name, false),
                stage.kind.name(),
                stage.signature.short(),
                status,
                stage.image_id.as_deref().map(short_id).unwrap_or("-")
            );
        }
    }
}
