//! Process-local stage cache

use crate::cache::{ImageId, StageCache};
use crate::error::StagehandResult;
use crate::signature::Signature;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Signature, ImageId>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl StageCache for MemoryCache {
    async fn get(&self, signature: &Signature) -> StagehandResult<Option<ImageId>> {
        Ok(self.entries.read().await.get(signature).cloned())
    }

    async fn put(&self, signature: &Signature, image: &ImageId) -> StagehandResult<()> {
        self.entries
            .write()
            .await
            .insert(signature.clone(), image.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
