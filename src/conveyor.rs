//! Image build pipeline
//!
//! The conveyor walks the stage chain of each image in order. Every stage
//! gets a signature from the previous stage's signature and its own inputs;
//! a cache hit adopts the stored image, a miss runs a build container from
//! the previous stage's image and records the commit.
//!
//! Images are built concurrently; stages within one image never are.

use crate::cache::{labels, ImageId, SignatureLocks, StageCache};
use crate::cancel::CancelToken;
use crate::config::schema::ImageConfig;
use crate::container::{ensure_tooling_container, BaseImage, BuildContainer, ContainerSettings};
use crate::error::{StagehandError, StagehandResult};
use crate::logging::{image_log_process_name, LogFormat};
use crate::orchestration::{ContainerRuntime, ImageInspect};
use crate::signature::{compute_signature, Signature};
use crate::stage::{validate_image, BuildContext, Stage, StageKind};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub kind: StageKind,
    pub signature: Signature,
    /// `None` in a plan for stages that are not built yet
    pub image_id: Option<ImageId>,
    pub cached: bool,
}

/// Outcome of building one image
#[derive(Debug, Clone, Serialize)]
pub struct ImageBuildReport {
    pub name: String,
    pub stages: Vec<StageReport>,
    /// Image of the last stage
    pub image: ImageId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImageBuildReport {
    /// Signature of the last stage
    pub fn signature(&self) -> Option<&Signature> {
        self.stages.last().map(|stage| &stage.signature)
    }

    pub fn cached_stages(&self) -> usize {
        self.stages.iter().filter(|stage| stage.cached).count()
    }
}

/// Stage pipeline driver shared by all images of a build
pub struct Conveyor {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Arc<dyn StageCache>,
    locks: SignatureLocks,
    settings: ContainerSettings,
    log_format: LogFormat,
    cancel: CancelToken,
    tooling_ready: OnceCell<()>,
}

impl Conveyor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            runtime,
            cache,
            locks: SignatureLocks::new(),
            settings: ContainerSettings::default(),
            log_format: LogFormat::Pretty,
            cancel: CancelToken::new(),
            tooling_ready: OnceCell::new(),
        }
    }

    pub fn with_settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validate every image, then build them concurrently.
    ///
    /// A configuration error in any image fails the whole call before the
    /// runtime is touched. Build failures are reported per image, in input
    /// order.
    pub async fn build_all(
        &self,
        jobs: Vec<(ImageConfig, BuildContext)>,
    ) -> StagehandResult<Vec<StagehandResult<ImageBuildReport>>> {
        for (image, _) in &jobs {
            validate_image(image)?;
        }

        let builds = jobs
            .into_iter()
            .map(|(image, ctx)| async move { self.build_image(&image, ctx).await });

        Ok(join_all(builds).await)
    }

    /// Build one image's stage chain
    pub async fn build_image(
        &self,
        image: &ImageConfig,
        mut ctx: BuildContext,
    ) -> StagehandResult<ImageBuildReport> {
        let stages = validate_image(image)?;
        let process = image_log_process_name(&image.name, false, self.log_format);
        let started_at = Utc::now();
        info!("{}: building from {}", process, image.from);

        let base = self.resolve_base(&image.from).await?;
        ctx.base_image_id = Some(base.id.clone());

        let mut from = BaseImage::inspected(image.from.clone(), base);
        let mut dependency: Option<Signature> = None;
        let mut reports = Vec::with_capacity(stages.len());

        for stage in &stages {
            if self.cancel.is_cancelled() {
                return Err(StagehandError::Cancelled);
            }

            let kind = stage.kind();
            let inputs = stage.dependencies(&ctx).await?;
            let signature = compute_signature(dependency.as_ref(), kind, &inputs);

            let (image_id, cached) = self
                .stage_image(stage, &ctx, &inputs, &signature, from)
                .await?;
            info!(
                "{}: {} {} [{}]",
                process,
                kind,
                if cached { "cached" } else { "built" },
                signature.short()
            );

            // Inspected lazily, only if the next stage has to be built
            from = BaseImage {
                reference: image_id.clone(),
                inspect: None,
            };
            reports.push(StageReport {
                kind,
                signature: signature.clone(),
                image_id: Some(image_id),
                cached,
            });
            dependency = Some(signature);
        }

        let image_id = from.reference;
        info!("{}: done, {}", process, image_id);

        Ok(ImageBuildReport {
            name: image.name.clone(),
            stages: reports,
            image: image_id,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Signatures and cache state of an image's stages, without building.
    ///
    /// The base image is not pulled; with a base missing locally the From
    /// signature differs from the one a build would compute.
    pub async fn plan(
        &self,
        image: &ImageConfig,
        mut ctx: BuildContext,
    ) -> StagehandResult<Vec<StageReport>> {
        let stages = validate_image(image)?;
        match self.runtime.inspect_image(&image.from).await? {
            Some(base) => ctx.base_image_id = Some(base.id),
            None => debug!("Base image {} is not present locally", image.from),
        }

        let mut dependency: Option<Signature> = None;
        let mut reports = Vec::with_capacity(stages.len());
        for stage in &stages {
            let kind = stage.kind();
            let inputs = stage.dependencies(&ctx).await?;
            let signature = compute_signature(dependency.as_ref(), kind, &inputs);
            let image_id = self.cache.get(&signature).await?;

            reports.push(StageReport {
                kind,
                signature: signature.clone(),
                cached: image_id.is_some(),
                image_id,
            });
            dependency = Some(signature);
        }

        Ok(reports)
    }

    /// Inspect the base image, pulling it when it is not present
    async fn resolve_base(&self, reference: &str) -> StagehandResult<ImageInspect> {
        if let Some(inspect) = self.runtime.inspect_image(reference).await? {
            return Ok(inspect);
        }

        info!("Pulling {}", reference);
        self.runtime.pull_image(reference).await?;
        self.runtime
            .inspect_image(reference)
            .await?
            .ok_or_else(|| StagehandError::ImageMissing(reference.to_string()))
    }

    /// Cached image for `signature`, building it on a miss
    async fn stage_image(
        &self,
        stage: &Stage,
        ctx: &BuildContext,
        inputs: &[String],
        signature: &Signature,
        from: BaseImage,
    ) -> StagehandResult<(ImageId, bool)> {
        if let Some(id) = self.cache.get(signature).await? {
            return Ok((id, true));
        }

        let lock = self.locks.lock_for(signature);
        let _guard = lock.lock().await;

        // Another image may have built it while we waited
        if let Some(id) = self.cache.get(signature).await? {
            return Ok((id, true));
        }

        let id = self.build_stage(stage, ctx, inputs, signature, from).await?;
        self.cache.put(signature, &id).await?;
        Ok((id, false))
    }

    async fn build_stage(
        &self,
        stage: &Stage,
        ctx: &BuildContext,
        inputs: &[String],
        signature: &Signature,
        from: BaseImage,
    ) -> StagehandResult<ImageId> {
        self.tooling_ready
            .get_or_try_init(|| ensure_tooling_container(self.runtime.as_ref(), &self.settings.tooling))
            .await?;

        let from = if from.inspect.is_some() {
            from
        } else {
            let inspect = self
                .runtime
                .inspect_image(&from.reference)
                .await?
                .ok_or_else(|| StagehandError::ImageMissing(from.reference.clone()))?;
            BaseImage::inspected(from.reference, inspect)
        };

        let kind = stage.kind();
        let mut container = BuildContainer::new(kind, from, self.settings.clone());
        let service_labels = &mut container.service_commit_change_options_mut().labels;
        service_labels.insert(labels::SIGNATURE.to_string(), signature.to_string());
        service_labels.insert(labels::STAGE.to_string(), kind.name().to_string());

        stage.prepare_image(ctx, inputs, &mut container).await?;
        debug!(
            "Building {} stage {} in {}",
            kind,
            signature.short(),
            container.name()
        );

        container.execute(self.runtime.as_ref(), &self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::schema::{DockerConfig, ShellConfig, ToolingConfig};
    use crate::orchestration::mock::{Call, RecordingRuntime};
    use crate::orchestration::ImageConfigInspect;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runtime() -> Arc<RecordingRuntime> {
        Arc::new(
            RecordingRuntime::new()
                .with_image("alpine:3.18", ImageConfigInspect::default())
                .with_image(&ToolingConfig::default().image, ImageConfigInspect::default()),
        )
    }

    fn alpine_image(name: &str) -> ImageConfig {
        ImageConfig {
            name: name.to_string(),
            from: "alpine:3.18".to_string(),
            shell: ShellConfig {
                setup: vec!["echo hi > /f".to_string()],
                ..Default::default()
            },
            docker: Some(DockerConfig {
                workdir: Some("/app".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn context(name: &str, dir: &TempDir) -> BuildContext {
        BuildContext::new(name, dir.path().to_path_buf(), dir.path().join("scratch"))
    }

    struct BrokenCache;

    #[async_trait]
    impl StageCache for BrokenCache {
        async fn get(&self, _signature: &Signature) -> StagehandResult<Option<ImageId>> {
            Err(StagehandError::Cache("backend down".to_string()))
        }

        async fn put(&self, _signature: &Signature, _image: &ImageId) -> StagehandResult<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn second_build_is_fully_cached() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let cache = Arc::new(MemoryCache::new());
        let image = alpine_image("app");

        let first = Conveyor::new(runtime.clone(), cache.clone())
            .build_image(&image, context("app", &dir))
            .await
            .unwrap();

        let kinds: Vec<_> = first.stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StageKind::From, StageKind::Setup, StageKind::DockerInstructions]
        );
        assert_eq!(first.cached_stages(), 0);
        assert_eq!(runtime.creates().len(), 3);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 3);

        runtime.clear_calls();
        let second = Conveyor::new(runtime.clone(), cache.clone())
            .build_image(&image, context("app", &dir))
            .await
            .unwrap();

        assert_eq!(second.image, first.image);
        assert_eq!(second.signature(), first.signature());
        assert_eq!(second.cached_stages(), 3);
        assert!(runtime.creates().is_empty());
    }

    #[tokio::test]
    async fn stages_chain_on_previous_image() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        let report = conveyor
            .build_image(&alpine_image("app"), context("app", &dir))
            .await
            .unwrap();

        let creates = runtime.creates();
        assert_eq!(creates[0].image, "sha256:alpine-3.18");
        assert_eq!(Some(&creates[1].image), report.stages[0].image_id.as_ref());
        assert_eq!(Some(&creates[2].image), report.stages[1].image_id.as_ref());
        assert_eq!(Some(&report.image), report.stages[2].image_id.as_ref());

        let commits = runtime.commits();
        let signature = report.stages[0].signature.as_str();
        assert!(commits[0]
            .iter()
            .any(|c| c.contains(labels::SIGNATURE) && c.contains(signature)));
        assert!(commits[2].iter().any(|c| c == "WORKDIR /app"));
    }

    #[tokio::test]
    async fn tooling_container_created_once() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        conveyor
            .build_image(&alpine_image("app"), context("app", &dir))
            .await
            .unwrap();

        assert_eq!(
            runtime.count(|c| matches!(c, Call::CreateTooling { .. })),
            1
        );
    }

    #[tokio::test]
    async fn failure_keeps_earlier_stages() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        conveyor
            .build_image(&alpine_image("app"), context("app", &dir))
            .await
            .unwrap();

        *runtime.exit_code.lock().unwrap() = 1;
        runtime.clear_calls();

        let mut broken = alpine_image("app");
        broken.shell.setup = vec!["exit 1".to_string()];
        let err = conveyor
            .build_image(&broken, context("app", &dir))
            .await
            .unwrap_err();

        assert!(matches!(err, StagehandError::ContainerCommand { .. }));
        assert_eq!(runtime.creates().len(), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);

        let plan = conveyor
            .plan(&broken, context("app", &dir))
            .await
            .unwrap();
        let cached: Vec<_> = plan.iter().map(|s| s.cached).collect();
        assert_eq!(cached, vec![true, false, false]);
    }

    #[tokio::test]
    async fn cancel_kills_running_stage() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        *runtime.start_delay.lock().unwrap() = Some(Duration::from_secs(30));
        let cache = Arc::new(MemoryCache::new());
        let cancel = CancelToken::new();
        let conveyor =
            Conveyor::new(runtime.clone(), cache.clone()).with_cancel(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let err = conveyor
            .build_image(&alpine_image("app"), context("app", &dir))
            .await
            .unwrap_err();

        assert!(matches!(err, StagehandError::Cancelled));
        assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
        assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn shared_signature_built_once() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        *runtime.start_delay.lock().unwrap() = Some(Duration::from_millis(20));
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        let results = conveyor
            .build_all(vec![
                (alpine_image("api"), context("api", &dir)),
                (alpine_image("worker"), context("worker", &dir)),
            ])
            .await
            .unwrap();

        let reports: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(reports[0].name, "api");
        assert_eq!(reports[1].name, "worker");
        assert_eq!(reports[0].image, reports[1].image);
        assert_eq!(runtime.creates().len(), 3);
    }

    #[tokio::test]
    async fn invalid_image_fails_before_runtime() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        let mut invalid = alpine_image("broken");
        invalid.from = String::new();
        let err = conveyor
            .build_all(vec![
                (alpine_image("app"), context("app", &dir)),
                (invalid, context("broken", &dir)),
            ])
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn cache_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(BrokenCache));

        let err = conveyor
            .build_image(&alpine_image("app"), context("app", &dir))
            .await
            .unwrap_err();

        assert!(matches!(err, StagehandError::Cache(_)));
        assert!(runtime.creates().is_empty());
    }

    #[tokio::test]
    async fn plan_matches_build() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));
        let image = alpine_image("app");

        let before = conveyor.plan(&image, context("app", &dir)).await.unwrap();
        assert!(before.iter().all(|s| !s.cached && s.image_id.is_none()));
        assert!(runtime.creates().is_empty());

        let report = conveyor
            .build_image(&image, context("app", &dir))
            .await
            .unwrap();
        let after = conveyor.plan(&image, context("app", &dir)).await.unwrap();

        let planned: Vec<_> = before.iter().map(|s| &s.signature).collect();
        let built: Vec<_> = report.stages.iter().map(|s| &s.signature).collect();
        assert_eq!(planned, built);
        assert!(after.iter().all(|s| s.cached));
    }

    #[tokio::test]
    async fn missing_base_is_pulled() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime();
        let conveyor = Conveyor::new(runtime.clone(), Arc::new(MemoryCache::new()));

        let mut image = alpine_image("app");
        image.from = "debian:12".to_string();
        let err = conveyor
            .build_image(&image, context("app", &dir))
            .await
            .unwrap_err();

        // The recording runtime cannot pull
        assert!(matches!(err, StagehandError::ImageMissing(_)));
        assert_eq!(
            runtime.count(|c| *c == Call::Pull("debian:12".to_string())),
            1
        );
    }
}
