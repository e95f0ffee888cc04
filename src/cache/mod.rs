//! Stage cache
//!
//! Maps stage signatures to committed image ids. A hit means the stage is
//! skipped entirely; entries are immutable once written.
//!
//! | Backend | Storage | Lifetime |
//! |---------|---------|----------|
//! | `MemoryCache` | process map | current process |
//! | `RuntimeTagCache` | `<repository>:<signature>` tags | until images are removed |

mod memory;
mod runtime_tag;

pub use memory::MemoryCache;
pub use runtime_tag::RuntimeTagCache;

use crate::config::schema::{CacheBackend, CacheConfig};
use crate::error::StagehandResult;
use crate::orchestration::ContainerRuntime;
use crate::signature::Signature;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Image id as reported by the runtime
pub type ImageId = String;

/// Labels set on every committed stage image
pub mod labels {
    /// Full stage signature
    pub const SIGNATURE: &str = "io.stagehand.signature";
    /// Stage kind name
    pub const STAGE: &str = "io.stagehand.stage";
}

/// Signature -> image id store
#[async_trait]
pub trait StageCache: Send + Sync {
    /// Look up a signature. Errors are real failures, not misses.
    async fn get(&self, signature: &Signature) -> StagehandResult<Option<ImageId>>;

    /// Record the image built for a signature
    async fn put(&self, signature: &Signature, image: &ImageId) -> StagehandResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Create the configured cache backend
pub fn create_cache(
    config: &CacheConfig,
    runtime: Arc<dyn ContainerRuntime>,
) -> Arc<dyn StageCache> {
    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Runtime => Arc::new(RuntimeTagCache::new(runtime, config.repository.clone())),
    }
}

/// One async mutex per signature, so a signature is built at most once at a time
#[derive(Debug, Default)]
pub struct SignatureLocks {
    locks: Mutex<HashMap<Signature, Arc<tokio::sync::Mutex<()>>>>,
}

impl SignatureLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `signature`
    pub fn lock_for(&self, signature: &Signature) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries nobody holds any more
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
