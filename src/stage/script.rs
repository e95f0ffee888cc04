//! User shell stages (before_install, install, before_setup, setup)

use crate::container::BuildContainer;
use crate::error::{StagehandError, StagehandResult};
use crate::git;
use crate::signature::SignatureInputs;
use crate::stage::{build_globset, push_list, BuildContext, StageKind};

/// A pattern matches the path itself and everything below it
fn expand_path_patterns(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .flat_map(|path| {
            let path = path.trim_matches('/');
            [path.to_string(), format!("{}/**", path)]
        })
        .collect()
}

/// Runs user commands, optionally keyed on repository contents
#[derive(Debug, Clone)]
pub struct ScriptStage {
    kind: StageKind,
    commands: Vec<String>,
    /// Pathspecs whose blob ids at the source commit invalidate the stage
    git_paths: Vec<String>,
}

impl ScriptStage {
    pub fn new(kind: StageKind, commands: Vec<String>, git_paths: Vec<String>) -> Self {
        Self {
            kind,
            commands,
            git_paths,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub async fn dependencies(&self, ctx: &BuildContext) -> StagehandResult<Vec<String>> {
        let mut inputs = SignatureInputs::new();
        push_list(&mut inputs, &self.commands);

        if !self.git_paths.is_empty() {
            let (repo, commit) = ctx.require_git(self.kind)?;
            let matcher = build_globset(&expand_path_patterns(&self.git_paths))?;
            let entries = git::ls_tree(repo, commit).await?;

            let matched: Vec<String> = entries
                .iter()
                .filter(|entry| matcher.as_ref().is_some_and(|m| m.is_match(&entry.path)))
                .map(git::TreeEntry::to_input)
                .collect();
            push_list(&mut inputs, &matched);
        }

        Ok(inputs.into_vec())
    }

    pub fn prepare_image(&self, container: &mut BuildContainer) {
        container.add_run_commands(self.commands.iter().cloned());
    }

    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        if self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(StagehandError::stage_config(
                image,
                self.kind.name(),
                "empty command",
            ));
        }
        if self.git_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(StagehandError::stage_config(
                image,
                self.kind.name(),
                "empty git dependency path",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BaseImage, ContainerSettings};
    use crate::orchestration::ImageInspect;
    use std::path::PathBuf;

    fn ctx() -> BuildContext {
        BuildContext::new("app", PathBuf::from("/project"), PathBuf::from("/tmp/s"))
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn commands_are_inputs_in_order() {
        let stage = ScriptStage::new(StageKind::Install, strings(&["a", "b"]), Vec::new());
        assert_eq!(stage.dependencies(&ctx()).await.unwrap(), strings(&["2", "a", "b"]));
    }

    #[tokio::test]
    async fn git_paths_need_a_repository() {
        let stage = ScriptStage::new(
            StageKind::Install,
            strings(&["make"]),
            strings(&["Makefile"]),
        );
        let err = stage.dependencies(&ctx()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn commands_are_queued() {
        let stage = ScriptStage::new(StageKind::Setup, strings(&["echo hi > /f"]), Vec::new());
        let mut container = BuildContainer::new(
            StageKind::Setup,
            BaseImage::inspected("alpine", ImageInspect::default()),
            ContainerSettings::default(),
        );
        stage.prepare_image(&mut container);
        assert_eq!(container.user_run_commands(), &["echo hi > /f"]);
    }

    #[test]
    fn path_patterns_cover_directories() {
        assert_eq!(
            expand_path_patterns(&strings(&["src/", "*.json"])),
            strings(&["src", "src/**", "*.json", "*.json/**"])
        );
    }

    #[tokio::test]
    async fn only_matching_blobs_affect_inputs() {
        let Some((dir, head)) = git::test_support::repo_with_commit(&[
            ("package.json", "{}"),
            ("src/index.js", "1"),
        ])
        .await
        else {
            return;
        };
        let stage = ScriptStage::new(
            StageKind::Install,
            strings(&["npm ci"]),
            strings(&["package.json"]),
        );
        let ctx = ctx().with_git(dir.path().to_path_buf(), head);
        let before = stage.dependencies(&ctx).await.unwrap();
        assert_eq!(before.len(), 4);
        assert!(before[3].ends_with(" package.json"));

        std::fs::write(dir.path().join("src/index.js"), "2").unwrap();
        git::test_support::git(dir.path(), &["commit", "-qam", "code"]).await;
        let head = git::rev_parse(dir.path(), "HEAD").await.unwrap();
        let unrelated = stage
            .dependencies(&ctx.clone().with_git(dir.path().to_path_buf(), head))
            .await
            .unwrap();
        assert_eq!(before, unrelated);

        std::fs::write(dir.path().join("package.json"), "{\"a\":1}").unwrap();
        git::test_support::git(dir.path(), &["commit", "-qam", "deps"]).await;
        let head = git::rev_parse(dir.path(), "HEAD").await.unwrap();
        let changed = stage
            .dependencies(&ctx.with_git(dir.path().to_path_buf(), head))
            .await
            .unwrap();
        assert_ne!(before, changed);
    }

    #[tokio::test]
    async fn non_ascii_git_paths_are_tracked() {
        let Some((dir, head)) = git::test_support::repo_with_commit(&[
            ("données/a.txt", "1"),
            ("other.txt", "x"),
        ])
        .await
        else {
            return;
        };
        let stage = ScriptStage::new(
            StageKind::Install,
            strings(&["make"]),
            strings(&["données"]),
        );
        let ctx = ctx().with_git(dir.path().to_path_buf(), head);
        let before = stage.dependencies(&ctx).await.unwrap();
        assert_eq!(before.len(), 4);
        assert!(before[3].ends_with(" données/a.txt"));

        std::fs::write(dir.path().join("données/a.txt"), "2").unwrap();
        git::test_support::git(dir.path(), &["commit", "-qam", "data"]).await;
        let head = git::rev_parse(dir.path(), "HEAD").await.unwrap();
        let after = stage
            .dependencies(&ctx.with_git(dir.path().to_path_buf(), head))
            .await
            .unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn empty_command_rejected() {
        let stage = ScriptStage::new(StageKind::Setup, strings(&["ls", " "]), Vec::new());
        assert!(stage.validate("app").is_err());
    }
}
