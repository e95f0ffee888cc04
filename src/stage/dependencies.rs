//! Host file imports
//!
//! Copies files from the project directory into the image. The signature
//! covers the import declarations and the content hash of every selected
//! file, so editing an imported file rebuilds this stage and everything after.
//! The build container only sees a snapshot taken and re-hashed when the
//! stage is prepared, so the committed image matches its signature.

use crate::config::schema::ImportConfig;
use crate::container::BuildContainer;
use crate::error::{StagehandError, StagehandResult};
use crate::signature::{sha256_hex, SignatureInputs};
use crate::stage::{
    build_globset, check_destination, check_source_path, chown_spec, push_list, shell_quote,
    BuildContext, StageKind, CONTEXT_MOUNT, SCRATCH_MOUNT,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Files selected by one import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFiles {
    /// Directory the relative paths start from
    pub root: PathBuf,
    /// Selected paths relative to `root`, in lexical order
    pub files: Vec<String>,
    /// `add` names a single file rather than a directory
    pub single_file: bool,
}

fn relative_source(add: &str) -> &str {
    let trimmed = add.trim_start_matches("./").trim_matches('/');
    if trimmed == "." {
        ""
    } else {
        trimmed
    }
}

/// Resolve the files an import selects from `project_dir`
pub fn collect_import_files(
    project_dir: &Path,
    import: &ImportConfig,
) -> StagehandResult<ImportFiles> {
    let source = project_dir.join(relative_source(&import.add));
    let metadata = std::fs::metadata(&source)
        .map_err(|_| StagehandError::PathNotFound(source.clone()))?;

    if metadata.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let root = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dir.to_path_buf());
        return Ok(ImportFiles {
            root,
            files: vec![name],
            single_file: true,
        });
    }

    let include = build_globset(&import.include_paths)?;
    let exclude = build_globset(&import.exclude_paths)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", source.display());
            match e.into_io_error() {
                Some(io) => StagehandError::io(context, io),
                None => StagehandError::Internal(context),
            }
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(&source) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if include.as_ref().is_some_and(|set| !set.is_match(&relative)) {
            continue;
        }
        if exclude.as_ref().is_some_and(|set| set.is_match(&relative)) {
            continue;
        }
        files.push(relative);
    }
    files.sort();

    Ok(ImportFiles {
        root: source,
        files,
        single_file: false,
    })
}

fn import_inputs(project_dir: &Path, imports: &[ImportConfig]) -> StagehandResult<Vec<String>> {
    let mut inputs = SignatureInputs::new();

    for import in imports {
        inputs.push(&import.add).push(&import.to);
        push_list(&mut inputs, &import.include_paths);
        push_list(&mut inputs, &import.exclude_paths);
        inputs
            .push_opt(import.owner.as_deref())
            .push_opt(import.group.as_deref());

        let selected = collect_import_files(project_dir, import)?;
        inputs.push(selected.files.len().to_string());
        for file in &selected.files {
            let path = selected.root.join(file);
            let content = std::fs::read(&path)
                .map_err(|e| StagehandError::io(format!("reading {}", path.display()), e))?;
            inputs.push(file.as_str()).push(sha256_hex(&content));
        }
    }

    Ok(inputs.into_vec())
}

/// Copy every selected file into `snapshot_dir`, keeping its path relative
/// to `project_dir`, and return the signature inputs of the copy.
fn snapshot_imports(
    project_dir: &Path,
    snapshot_dir: &Path,
    imports: &[ImportConfig],
) -> StagehandResult<Vec<String>> {
    let create_dir = |dir: &Path| {
        std::fs::create_dir_all(dir)
            .map_err(|e| StagehandError::io(format!("creating {}", dir.display()), e))
    };

    create_dir(snapshot_dir)?;
    for import in imports {
        let selected = collect_import_files(project_dir, import)?;
        if !selected.single_file {
            create_dir(&snapshot_dir.join(relative_source(&import.add)))?;
        }

        for file in &selected.files {
            let source = selected.root.join(file);
            let relative = source.strip_prefix(project_dir).map_err(|_| {
                StagehandError::Internal(format!(
                    "{} is outside {}",
                    source.display(),
                    project_dir.display()
                ))
            })?;
            let target = snapshot_dir.join(relative);
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            std::fs::copy(&source, &target)
                .map_err(|e| StagehandError::io(format!("copying {}", source.display()), e))?;
        }
    }

    import_inputs(snapshot_dir, imports)
}

/// Copies host files into the image
#[derive(Debug, Clone)]
pub struct DependenciesStage {
    imports: Vec<ImportConfig>,
}

impl DependenciesStage {
    pub fn new(imports: Vec<ImportConfig>) -> Self {
        Self { imports }
    }

    pub async fn dependencies(&self, ctx: &BuildContext) -> StagehandResult<Vec<String>> {
        let project_dir = ctx.project_dir.clone();
        let imports = self.imports.clone();

        tokio::task::spawn_blocking(move || import_inputs(&project_dir, &imports))
            .await
            .map_err(|e| StagehandError::Internal(format!("hashing imports: {}", e)))?
    }

    /// Snapshot the imported files into the scratch directory and queue the
    /// copy commands.
    ///
    /// The container copies from the snapshot, never from the live project.
    /// A snapshot whose content differs from `inputs` fails the stage with
    /// [`StagehandError::ImportsChanged`].
    pub async fn prepare_image(
        &self,
        ctx: &BuildContext,
        inputs: &[String],
        container: &mut BuildContainer,
    ) -> StagehandResult<()> {
        let tooling = container.tooling().clone();
        let mkdir = tooling.bin("mkdir");
        let tar = tooling.tar();

        let snapshot_dir = ctx
            .scratch_dir
            .join(format!("context-{}", uuid::Uuid::new_v4().simple()));
        let snapshot_inputs = {
            let project_dir = ctx.project_dir.clone();
            let snapshot_dir = snapshot_dir.clone();
            let imports = self.imports.clone();
            tokio::task::spawn_blocking(move || {
                snapshot_imports(&project_dir, &snapshot_dir, &imports)
            })
            .await
            .map_err(|e| StagehandError::Internal(format!("snapshotting imports: {}", e)))??
        };
        if snapshot_inputs != inputs {
            return Err(StagehandError::ImportsChanged(ctx.image_name.clone()));
        }

        let mut commands = Vec::new();
        for (index, import) in self.imports.iter().enumerate() {
            let selected = collect_import_files(&snapshot_dir, import)?;
            let source = match relative_source(&import.add) {
                "" => CONTEXT_MOUNT.to_string(),
                relative => format!("{}/{}", CONTEXT_MOUNT, relative),
            };
            let to = shell_quote(&import.to);

            if selected.single_file {
                let parent = Path::new(&import.to)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "/".to_string());
                commands.push(format!("{} -p {}", mkdir, shell_quote(&parent)));
                commands.push(format!(
                    "{} -p {} {}",
                    tooling.bin("cp"),
                    shell_quote(&source),
                    to
                ));
            } else {
                commands.push(format!("{} -p {}", mkdir, to));
                if !selected.files.is_empty() {
                    let list_name = format!("import-{}-{}.list", index, uuid::Uuid::new_v4().simple());
                    let list_path = ctx.scratch_dir.join(&list_name);
                    let mut list = selected.files.join("\0");
                    list.push('\0');
                    tokio::fs::write(&list_path, list).await.map_err(|e| {
                        StagehandError::io(format!("writing {}", list_path.display()), e)
                    })?;

                    commands.push(format!(
                        "{tar} -C {} --null -T {}/{} -cf - | {tar} -C {} -xf -",
                        shell_quote(&source),
                        SCRATCH_MOUNT,
                        list_name,
                        to,
                    ));
                }
            }

            if let Some(spec) = chown_spec(import.owner.as_deref(), import.group.as_deref()) {
                commands.push(format!("{} -R {} {}", tooling.bin("chown"), shell_quote(&spec), to));
            }

            debug!(
                "Import {} -> {}: {} file(s)",
                import.add,
                import.to,
                selected.files.len()
            );
        }

        let options = container.run_options_mut();
        options.volumes.push(format!(
            "{}:{}:ro",
            snapshot_dir.display(),
            CONTEXT_MOUNT
        ));
        options.volumes.push(format!(
            "{}:{}:ro",
            ctx.scratch_dir.display(),
            SCRATCH_MOUNT
        ));
        container.add_run_commands(commands);

        Ok(())
    }

    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        for import in &self.imports {
            check_source_path(image, StageKind::Dependencies, &import.add)?;
            check_destination(image, StageKind::Dependencies, &import.to)?;
            build_globset(&import.include_paths)?;
            build_globset(&import.exclude_paths)?;
        }
        Ok(())
    }
}
