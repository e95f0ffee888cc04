//! Stage cache stored as image tags in the local runtime
//!
//! A stage image built for signature `S` is tagged `<repository>:S`. The
//! cache survives process restarts and is shared by every process using the
//! same runtime.

use crate::cache::{ImageId, StageCache};
use crate::error::{StagehandError, StagehandResult};
use crate::orchestration::ContainerRuntime;
use crate::signature::Signature;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct RuntimeTagCache {
    runtime: Arc<dyn ContainerRuntime>,
    repository: String,
}

impl RuntimeTagCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, repository: impl Into<String>) -> Self {
        Self {
            runtime,
            repository: repository.into(),
        }
    }

    /// Tag naming the stage image of `signature`
    pub fn tag_for(&self, signature: &Signature) -> String {
        format!("{}:{}", self.repository, signature)
    }
}

#[async_trait]
impl StageCache for RuntimeTagCache {
    async fn get(&self, signature: &Signature) -> StagehandResult<Option<ImageId>> {
        let tag = self.tag_for(signature);
        let found = self
            .runtime
            .inspect_image(&tag)
            .await
            .map_err(|e| StagehandError::Cache(format!("looking up {}: {}", tag, e)))?;

        debug!("Cache {} for {}", if found.is_some() { "hit" } else { "miss" }, tag);
        Ok(found.map(|inspect| inspect.id))
    }

    async fn put(&self, signature: &Signature, image: &ImageId) -> StagehandResult<()> {
        let tag = self.tag_for(signature);
        self.runtime
            .tag_image(image, &tag)
            .await
            .map_err(|e| StagehandError::Cache(format!("tagging {} as {}: {}", image, tag, e)))
    }

    fn backend_name(&self) -> &'static str {
        "runtime"
    }
}
