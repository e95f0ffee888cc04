//! Repository contents at the source commit

use crate::config::schema::GitMappingConfig;
use crate::container::BuildContainer;
use crate::error::{StagehandError, StagehandResult};
use crate::git;
use crate::signature::SignatureInputs;
use crate::stage::{
    build_globset, check_destination, check_source_path, chown_spec, push_list, shell_quote,
    BuildContext, StageKind, SCRATCH_MOUNT,
};

/// Adds repository paths from the source commit to the image
#[derive(Debug, Clone)]
pub struct GitArchiveStage {
    mappings: Vec<GitMappingConfig>,
}

/// Tree-ish selecting `add` inside `commit`
fn tree_ish(commit: &str, add: &str) -> String {
    match add.trim_matches('/') {
        "" | "." => commit.to_string(),
        path => format!("{}:{}", commit, path),
    }
}

/// Pathspecs for include/exclude globs
fn pathspecs(mapping: &GitMappingConfig) -> Vec<String> {
    let mut specs: Vec<String> = mapping
        .include_paths
        .iter()
        .map(|p| format!(":(glob){}", p))
        .collect();
    specs.extend(
        mapping
            .exclude_paths
            .iter()
            .map(|p| format!(":(exclude,glob){}", p)),
    );
    specs
}

impl GitArchiveStage {
    pub fn new(mappings: Vec<GitMappingConfig>) -> Self {
        Self { mappings }
    }

    pub fn dependencies(&self, ctx: &BuildContext) -> StagehandResult<Vec<String>> {
        let (_, commit) = ctx.require_git(StageKind::GitArchive)?;

        let mut inputs = SignatureInputs::new();
        inputs.push(commit);
        for mapping in &self.mappings {
            inputs.push(&mapping.add).push(&mapping.to);
            push_list(&mut inputs, &mapping.include_paths);
            push_list(&mut inputs, &mapping.exclude_paths);
            inputs
                .push_opt(mapping.owner.as_deref())
                .push_opt(mapping.group.as_deref());
        }
        Ok(inputs.into_vec())
    }

    pub async fn prepare_image(
        &self,
        ctx: &BuildContext,
        container: &mut BuildContainer,
    ) -> StagehandResult<()> {
        let (repo, commit) = ctx.require_git(StageKind::GitArchive)?;
        let tooling = container.tooling().clone();

        tokio::fs::create_dir_all(&ctx.scratch_dir).await.map_err(|e| {
            StagehandError::io(format!("creating {}", ctx.scratch_dir.display()), e)
        })?;

        let mut commands = Vec::new();
        for (index, mapping) in self.mappings.iter().enumerate() {
            let archive_name = format!(
                "git-{}-{}.tar",
                index,
                uuid::Uuid::new_v4().simple()
            );
            let archive_path = ctx.scratch_dir.join(&archive_name);
            git::archive(
                repo,
                &tree_ish(commit, &mapping.add),
                &pathspecs(mapping),
                &archive_path,
            )
            .await?;

            let to = shell_quote(&mapping.to);
            commands.push(format!("{} -p {}", tooling.bin("mkdir"), to));
            commands.push(format!(
                "{} -C {} -xf {}/{}",
                tooling.tar(),
                to,
                SCRATCH_MOUNT,
                archive_name
            ));
            if let Some(spec) = chown_spec(mapping.owner.as_deref(), mapping.group.as_deref()) {
                commands.push(format!(
                    "{} -R {} {}",
                    tooling.bin("chown"),
                    shell_quote(&spec),
                    to
                ));
            }
        }

        container.run_options_mut().volumes.push(format!(
            "{}:{}:ro",
            ctx.scratch_dir.display(),
            SCRATCH_MOUNT
        ));
        container.add_run_commands(commands);
        Ok(())
    }

    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        for mapping in &self.mappings {
            check_source_path(image, StageKind::GitArchive, &mapping.add)?;
            check_destination(image, StageKind::GitArchive, &mapping.to)?;
            build_globset(&mapping.include_paths)?;
            build_globset(&mapping.exclude_paths)?;
        }
        Ok(())
    }
}
