//! Values command - chart values referencing the project's images
//!
//! Images are referenced as `<repo>:<signature>` of their last stage, the
//! tags the runtime cache gives stage images.

use crate::cancel::CancelToken;
use crate::chart_values::{service_values, ChartImage, ServiceValuesOptions};
use crate::cli::args::ValuesArgs;
use crate::cli::commands::project::{conveyor, resolve_project, select_images};
use crate::config::{Config, ConfigManager};
use crate::container::IntrospectMode;
use crate::error::{StagehandError, StagehandResult};
use crate::secret_values::{extract_secret_values_from_map, mask_secret_values_in_string};
use serde_json::Value;
use std::path::Path;

/// Execute the values command
pub async fn execute(args: ValuesArgs, config: &Config) -> StagehandResult<()> {
    let images = select_images(config, &[])?;
    let project = resolve_project(config, false).await?;
    let repo = args
        .repo
        .clone()
        .unwrap_or_else(|| config.cache.repository.clone());

    let chart_images = if args.stub {
        images
            .iter()
            .map(|image| ChartImage {
                name: image.name.clone(),
                reference: format!("{}:TAG", repo),
            })
            .collect()
    } else {
        let conveyor = conveyor(config, CancelToken::new(), IntrospectMode::Off).await?;
        let mut chart_images = Vec::with_capacity(images.len());
        for (image, ctx) in project.jobs(&images, &ConfigManager::build_tmp_dir()) {
            let stages = conveyor.plan(&image, ctx).await?;
            let signature = stages
                .last()
                .map(|stage| stage.signature.to_string())
                .ok_or_else(|| StagehandError::Internal(format!("image '{}' has no stages", image.name)))?;
            chart_images.push(ChartImage {
                name: image.name,
                reference: format!("{}:{}", repo, signature),
            });
        }
        chart_images
    };

    let values = service_values(
        &project.name,
        &repo,
        &args.namespace,
        &chart_images,
        &ServiceValuesOptions {
            env: args.env.clone(),
            is_stub: args.stub,
        },
    );

    let secrets = match &args.secret_values {
        Some(path) => Some(read_secret_values(path).await?),
        None => None,
    };
    println!("{}", render_values(values, secrets, args.show_secrets)?);
    Ok(())
}

async fn read_secret_values(path: &Path) -> StagehandResult<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StagehandError::io(format!("reading {}", path.display()), e))?;
    let secrets: Value = serde_json::from_str(&content)?;
    if !secrets.is_object() {
        return Err(StagehandError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: "secret values must be a JSON object".to_string(),
        });
    }
    Ok(secrets)
}

/// Merge secret values in and render; secrets are masked unless shown
fn render_values(
    mut values: Value,
    secrets: Option<Value>,
    show_secrets: bool,
) -> StagehandResult<String> {
    let Some(secrets) = secrets else {
        return Ok(serde_json::to_string_pretty(&values)?);
    };

    let patterns = extract_secret_values_from_map(&secrets);
    merge_json(&mut values, secrets);
    let rendered = serde_json::to_string_pretty(&values)?;

    Ok(if show_secrets {
        rendered
    } else {
        mask_secret_values_in_string(&patterns, &rendered)
    })
}

/// Overlay `overlay` onto `base`; objects merge key by key
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
