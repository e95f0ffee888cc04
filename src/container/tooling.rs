//! Service tooling container
//!
//! Build containers never rely on the target image's shell. A long-lived
//! container created from the tooling image exposes static binaries under
//! `bin_dir`, and every build container mounts it with `--volumes-from`.

use crate::config::schema::ToolingConfig;
use crate::error::StagehandResult;
use crate::orchestration::ContainerRuntime;
use tracing::debug;

/// Make sure the tooling container exists, pulling its image if needed
pub async fn ensure_tooling_container(
    runtime: &dyn ContainerRuntime,
    tooling: &ToolingConfig,
) -> StagehandResult<()> {
    if runtime.container_exists(&tooling.container).await? {
        debug!("Tooling container {} already exists", tooling.container);
        return Ok(());
    }

    if runtime.inspect_image(&tooling.image).await?.is_none() {
        runtime.pull_image(&tooling.image).await?;
    }

    runtime
        .create_tooling_container(&tooling.container, &tooling.image)
        .await
}
