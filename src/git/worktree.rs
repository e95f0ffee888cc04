//! Worktree cache synchronization
//!
//! Builds in dev mode use the source repository's uncommitted changes. They
//! are replayed as synthetic commits on service branches inside a cached
//! worktree, so the rest of the engine only ever deals with commit ids.
//!
//! Cache entry layout:
//!
//! ```text
//! <cache>/.lock            exclusive lock
//! <cache>/current_commit   commit the worktree was prepared at
//! <cache>/worktree/        detached checkout
//! ```

use crate::error::{StagehandError, StagehandResult};
use crate::git::lock::WorktreeLock;
use crate::git::{run_git, run_git_with, GitInvocation};
use crate::signature::sha256_hex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEV_BRANCH_PREFIX: &str = "stagehand-dev";
pub const CURRENT_COMMIT_FILE: &str = "current_commit";
pub const WORKTREE_DIR: &str = "worktree";

const COMMIT_NAME: &str = "stagehand";
const COMMIT_EMAIL: &str = "stagehand@localhost";

/// Options for [`sync_source_worktree`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Skip the tracked-changes pass
    pub only_staged_changes: bool,
    pub lock_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            only_staged_changes: false,
            lock_timeout: Duration::from_secs(600),
        }
    }
}

/// `stagehand-dev-<commit>` or `stagehand-dev-<commit>-<intermediate>`
pub fn dev_branch_name(commit: &str, intermediate: Option<&str>) -> String {
    match intermediate {
        Some(intermediate) => format!("{}-{}-{}", DEV_BRANCH_PREFIX, commit, intermediate),
        None => format!("{}-{}", DEV_BRANCH_PREFIX, commit),
    }
}

fn absolute(path: &Path) -> StagehandResult<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| StagehandError::io(format!("resolving {}", path.display()), e))
}

/// Cache entry directory for a repository, keyed by its absolute git dir
pub fn worktree_cache_dir(root: &Path, git_dir: &Path) -> StagehandResult<PathBuf> {
    let git_dir = absolute(git_dir)?;
    let key = sha256_hex(git_dir.to_string_lossy().as_bytes());
    Ok(root.join(&key[..16]))
}

/// Check out `commit` detached in `<cache>/worktree`, creating the worktree
/// if needed, and record it in `<cache>/current_commit`.
///
/// Caller must hold the entry's [`WorktreeLock`].
pub async fn prepare_worktree(
    git_dir: &Path,
    cache_dir: &Path,
    commit: &str,
) -> StagehandResult<PathBuf> {
    let worktree = cache_dir.join(WORKTREE_DIR);
    let marker = cache_dir.join(CURRENT_COMMIT_FILE);
    let git_dir_arg = format!("--git-dir={}", git_dir.display());

    let current = tokio::fs::read_to_string(&marker).await.ok();
    let valid = worktree.join(".git").exists();

    if valid {
        if current.as_deref().map(str::trim) != Some(commit) {
            debug!("Switching worktree {} to {}", worktree.display(), commit);
        }
        run_git(&worktree, &["checkout", "--force", "--detach", commit]).await?;
        run_git(&worktree, &["reset", "--hard", commit]).await?;
        run_git(&worktree, &["clean", "-d", "-f", "-f", "-x"]).await?;
    } else {
        if worktree.exists() {
            tokio::fs::remove_dir_all(&worktree).await.map_err(|e| {
                StagehandError::io(format!("removing stale {}", worktree.display()), e)
            })?;
        }
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| StagehandError::io(format!("creating {}", cache_dir.display()), e))?;

        let worktree_arg = worktree.to_string_lossy().into_owned();
        run_git(cache_dir, &[git_dir_arg.as_str(), "worktree", "prune"]).await?;
        run_git(
            cache_dir,
            &[
                git_dir_arg.as_str(),
                "worktree",
                "add",
                "--force",
                "--detach",
                worktree_arg.as_str(),
                commit,
            ],
        )
        .await?;
    }

    tokio::fs::write(&marker, format!("{}\n", commit))
        .await
        .map_err(|e| StagehandError::io(format!("writing {}", marker.display()), e))?;

    Ok(worktree)
}

/// Replay the source worktree's staged (and, unless disabled, tracked)
/// changes on top of `commit`, returning the resulting commit id.
///
/// With no local changes the result is `commit` itself. Syncing the same
/// changes again yields the same id.
pub async fn sync_source_worktree(
    git_dir: &Path,
    source_worktree: &Path,
    cache_dir: &Path,
    commit: &str,
    opts: &SyncOptions,
) -> StagehandResult<String> {
    let _lock = WorktreeLock::acquire_async(cache_dir, opts.lock_timeout).await?;

    let git_dir = absolute(git_dir)?;
    let source_worktree = absolute(source_worktree)?;
    let cache_dir = absolute(cache_dir)?;

    let worktree = prepare_worktree(&git_dir, &cache_dir, commit).await?;

    // The worktree is about to move to a dev branch
    let marker = cache_dir.join(CURRENT_COMMIT_FILE);
    if let Err(e) = tokio::fs::remove_file(&marker).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(StagehandError::io(format!("removing {}", marker.display()), e));
        }
    }

    let staged = sync_branch(
        &source_worktree,
        &worktree,
        commit,
        &dev_branch_name(commit, None),
        true,
    )
    .await?;

    let result = if opts.only_staged_changes {
        staged
    } else {
        sync_branch(
            &source_worktree,
            &worktree,
            &staged,
            &dev_branch_name(commit, Some(&staged)),
            false,
        )
        .await?
    };

    info!("Synced worktree of {} to {}", commit, result);
    Ok(result)
}

async fn sync_branch(
    source_worktree: &Path,
    worktree: &Path,
    commit: &str,
    branch: &str,
    only_staged: bool,
) -> StagehandResult<String> {
    let exists = !run_git(worktree, &["branch", "--list", branch])
        .await?
        .is_empty();

    let head = if exists {
        run_git(worktree, &["checkout", "--force", branch]).await?;
        run_git(worktree, &["rev-parse", branch]).await?
    } else {
        run_git(worktree, &["checkout", "--force", "-b", branch, commit]).await?;
        commit.to_string()
    };

    let mut diff_args = vec![
        "-c",
        "diff.renames=false",
        "-c",
        "core.quotePath=false",
        "diff",
        "--full-index",
        "--binary",
    ];
    if only_staged {
        diff_args.push("--cached");
    }
    diff_args.push(&head);

    let diff = run_git_with(source_worktree, &diff_args, GitInvocation::default()).await?;

    let result = if diff.is_empty() {
        debug!("Nothing to sync on {}", branch);
        head
    } else {
        debug!(
            "Syncing {} changes onto {}",
            if only_staged { "staged" } else { "tracked" },
            branch
        );
        run_git_with(
            worktree,
            &["apply", "--binary", "--index"],
            GitInvocation {
                stdin: Some(&diff),
                ..Default::default()
            },
        )
        .await?;

        commit_synced(worktree, &head, &diff).await?;
        run_git(worktree, &["rev-parse", branch]).await?
    };

    run_git(worktree, &["checkout", "--force", "--detach", result.as_str()]).await?;
    Ok(result)
}

/// Commit the applied diff with content-derived metadata.
///
/// The message names the diff hash and both dates are the parent's committer
/// date, so the same parent plus the same diff always gives the same commit id.
async fn commit_synced(worktree: &Path, parent: &str, diff: &[u8]) -> StagehandResult<()> {
    let parent_time = run_git(worktree, &["log", "-1", "--format=%ct", parent]).await?;
    let date = format!("{} +0000", parent_time);
    let message = format!("{} sync {}", COMMIT_NAME, &sha256_hex(diff)[..12]);

    run_git_with(
        worktree,
        &[
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--no-verify",
            "-m",
            message.as_str(),
        ],
        GitInvocation {
            stdin: None,
            env: vec![
                ("GIT_AUTHOR_NAME", COMMIT_NAME.to_string()),
                ("GIT_AUTHOR_EMAIL", COMMIT_EMAIL.to_string()),
                ("GIT_COMMITTER_NAME", COMMIT_NAME.to_string()),
                ("GIT_COMMITTER_EMAIL", COMMIT_EMAIL.to_string()),
                ("GIT_AUTHOR_DATE", date.clone()),
                ("GIT_COMMITTER_DATE", date),
            ],
        },
    )
    .await
    .map(|_| ())
}
