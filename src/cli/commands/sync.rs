//! Sync command - materialize local changes as a synthetic commit

use crate::cli::args::SyncArgs;
use crate::cli::commands::project::sync_dev_commit;
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::git;

/// Execute the sync command
pub async fn execute(args: SyncArgs, config: &Config) -> StagehandResult<()> {
    let dir = match &config.project.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| StagehandError::io("getting current directory", e))?,
    };

    if !git::is_git_available().await {
        return Err(StagehandError::CliNotFound {
            name: "git".to_string(),
            hint: "Install git to sync worktrees".to_string(),
        });
    }
    let repo = git::discover_repository(&dir)
        .await?
        .ok_or_else(|| StagehandError::PathNotFound(dir.join(".git")))?;

    let commit = git::rev_parse(&repo.worktree, &args.commit).await?;
    let synced = sync_dev_commit(
        config,
        &repo,
        &commit,
        args.only_staged || config.git.only_staged_changes,
    )
    .await?;

    println!("{}", synced);
    Ok(())
}
