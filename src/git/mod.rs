//! Git plumbing used by the build engine
//!
//! - command helpers (`ls-tree`, `archive`, `rev-parse`)
//! - `WorktreeLock`: exclusive lock on a worktree cache entry
//! - worktree synchronization producing synthetic dev commits

mod lock;
mod worktree;

pub use lock::WorktreeLock;
pub use worktree::{
    dev_branch_name, prepare_worktree, sync_source_worktree, worktree_cache_dir, SyncOptions,
    CURRENT_COMMIT_FILE, DEV_BRANCH_PREFIX, WORKTREE_DIR,
};

use crate::error::{StagehandError, StagehandResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A located repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Absolute git directory (`.git`)
    pub git_dir: PathBuf,
    /// Absolute top-level working tree
    pub worktree: PathBuf,
}

/// One `ls-tree -r` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub object: String,
    pub path: String,
}

impl TreeEntry {
    /// `<mode> <object> <path>` as hashed into signatures
    pub fn to_input(&self) -> String {
        format!("{} {} {}", self.mode, self.object, self.path)
    }
}

/// Extra inputs for a git invocation
#[derive(Debug, Default)]
pub(crate) struct GitInvocation<'a> {
    pub stdin: Option<&'a [u8]>,
    pub env: Vec<(&'static str, String)>,
}

fn describe(dir: &Path, args: &[&str]) -> String {
    format!("git -C {} {}", dir.display(), args.join(" "))
}

/// Run git in `dir`, returning raw stdout
pub(crate) async fn run_git_with(
    dir: &Path,
    args: &[&str],
    invocation: GitInvocation<'_>,
) -> StagehandResult<Vec<u8>> {
    let command = describe(dir, args);
    debug!("Executing: {}", command);

    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .envs(invocation.env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StagehandError::command_failed(&command, e))?;

    if let (Some(input), Some(mut stdin)) = (invocation.stdin, child.stdin.take()) {
        stdin
            .write_all(input)
            .await
            .map_err(|e| StagehandError::io(format!("writing stdin of {}", command), e))?;
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| StagehandError::command_failed(&command, e))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(StagehandError::GitCommand {
            command,
            output: format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
            .trim()
            .to_string(),
        })
    }
}

/// Run git in `dir`, returning trimmed stdout
pub(crate) async fn run_git(dir: &Path, args: &[&str]) -> StagehandResult<String> {
    let stdout = run_git_with(dir, args, GitInvocation::default()).await?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

/// Check whether a usable `git` binary is on PATH
pub async fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Locate the repository containing `dir`, if any
pub async fn discover_repository(dir: &Path) -> StagehandResult<Option<Repository>> {
    let git_dir = match run_git(dir, &["rev-parse", "--absolute-git-dir"]).await {
        Ok(out) => PathBuf::from(out),
        Err(StagehandError::GitCommand { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    let worktree = PathBuf::from(run_git(dir, &["rev-parse", "--show-toplevel"]).await?);

    Ok(Some(Repository { git_dir, worktree }))
}

/// Resolve a revision to a full commit id
pub async fn rev_parse(dir: &Path, revision: &str) -> StagehandResult<String> {
    let spec = format!("{}^{{commit}}", revision);
    run_git(dir, &["rev-parse", "--verify", spec.as_str()]).await
}

/// Recursive tree listing of `commit`.
///
/// Records are NUL-terminated (`-z`) so paths come back verbatim instead of
/// C-quoted.
pub async fn ls_tree(repo: &Path, commit: &str) -> StagehandResult<Vec<TreeEntry>> {
    let output = run_git_with(
        repo,
        &["ls-tree", "-r", "-z", "--full-tree", commit],
        GitInvocation::default(),
    )
    .await?;

    Ok(output
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let (meta, path) = record.split_once('\t')?;
            let mut parts = meta.split_whitespace();
            let mode = parts.next()?.to_string();
            let _kind = parts.next()?;
            let object = parts.next()?.to_string();
            Some(TreeEntry {
                mode,
                object,
                path: path.to_string(),
            })
        })
        .collect())
}

/// Write a tar archive of `tree_ish` (optionally limited by pathspecs) to `output`
pub async fn archive(
    repo: &Path,
    tree_ish: &str,
    pathspecs: &[String],
    output: &Path,
) -> StagehandResult<()> {
    let output_arg = format!("--output={}", output.display());
    let mut args = vec!["archive", "--format=tar", output_arg.as_str(), tree_ish];
    if !pathspecs.is_empty() {
        args.push("--");
        args.extend(pathspecs.iter().map(String::as_str));
    }

    run_git(repo, &args).await.map(|_| ())
}
