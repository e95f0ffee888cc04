//! Build command - build images through the stage conveyor

use crate::cancel::CancelToken;
use crate::cli::args::{BuildArgs, OutputFormat};
use crate::cli::commands::project::{
    conveyor, print_stage_table, remove_scratch, resolve_project, select_images,
};
use crate::config::{Config, ConfigManager};
use crate::container::IntrospectMode;
use crate::conveyor::ImageBuildReport;
use crate::error::StagehandResult;
use crate::logging::{image_log_name, image_log_process_name, LogFormat};
use crate::stage::validate_image;
use console::style;
use tracing::error;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> StagehandResult<()> {
    let images = select_images(config, &args.images)?;
    for image in &images {
        validate_image(image)?;
    }
    let project = resolve_project(config, args.dev).await?;

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();
    let conveyor = conveyor(config, cancel, introspect_mode(&args)).await?;

    let scratch_root =
        ConfigManager::build_tmp_dir().join(uuid::Uuid::new_v4().simple().to_string());
    let results = conveyor
        .build_all(project.jobs(&images, &scratch_root))
        .await;
    remove_scratch(&scratch_root).await;

    let format = LogFormat::from_config(&config.general);
    let mut reports = Vec::new();
    let mut first_error = None;
    for (image, result) in images.iter().zip(results?) {
        match result {
            Ok(report) => reports.push(report),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => error!("{}: {}", image_log_process_name(&image.name, false, format), e),
        }
    }

    match args.format {
        OutputFormat::Table => print_table(&reports),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn introspect_mode(args: &BuildArgs) -> IntrospectMode {
    if args.introspect_error {
        IntrospectMode::Error
    } else if args.introspect_before_error {
        IntrospectMode::BeforeError
    } else {
        IntrospectMode::Off
    }
}

fn print_table(reports: &[ImageBuildReport]) {
    if reports.is_empty() {
        return;
    }

    let rows: Vec<_> = reports
        .iter()
        .map(|r| (r.name.as_str(), r.stages.as_slice()))
        .collect();
    print_stage_table(&rows);

    println!();
    for report in reports {
        let seconds = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
        println!(
            "{} {} {} ({} of {} stages cached, {:.1}s)",
            style("✓").green(),
            image_log_name(&report.name, false),
            report.image,
            report.cached_stages(),
            report.stages.len(),
            seconds
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn build_args(argv: &[&str]) -> BuildArgs {
        match Cli::parse_from(argv).command {
            Commands::Build(args) => args,
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn introspect_flags_map_to_modes() {
        assert_eq!(
            introspect_mode(&build_args(&["stagehand", "build"])),
            IntrospectMode::Off
        );
        assert_eq!(
            introspect_mode(&build_args(&["stagehand", "build", "--introspect-error"])),
            IntrospectMode::Error
        );
        assert_eq!(
            introspect_mode(&build_args(&["stagehand", "build", "--introspect-before-error"])),
            IntrospectMode::BeforeError
        );
    }
}
