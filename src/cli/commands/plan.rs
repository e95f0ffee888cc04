//! Plan command - stage signatures and cache state, without building

use crate::cancel::CancelToken;
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::cli::commands::project::{
    conveyor, print_stage_table, remove_scratch, resolve_project, select_images,
};
use crate::config::{Config, ConfigManager};
use crate::container::IntrospectMode;
use crate::error::StagehandResult;
use serde_json::json;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> StagehandResult<()> {
    let images = select_images(config, &args.images)?;
    let project = resolve_project(config, args.dev).await?;
    let conveyor = conveyor(config, CancelToken::new(), IntrospectMode::Off).await?;

    // Import file lists and archives are only written while building
    let scratch_root =
        ConfigManager::build_tmp_dir().join(uuid::Uuid::new_v4().simple().to_string());

    let mut plans = Vec::with_capacity(images.len());
    for (image, ctx) in project.jobs(&images, &scratch_root) {
        let stages = conveyor.plan(&image, ctx).await?;
        plans.push((image.name, stages));
    }
    remove_scratch(&scratch_root).await;

    match args.format {
        OutputFormat::Table => {
            let rows: Vec<_> = plans
                .iter()
                .map(|(name, stages)| (name.as_str(), stages.as_slice()))
                .collect();
            print_stage_table(&rows);
        }
        OutputFormat::Json => {
            let value: Vec<_> = plans
                .iter()
                .map(|(name, stages)| json!({ "name": name, "stages": stages }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
