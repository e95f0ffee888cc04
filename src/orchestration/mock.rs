//! Recording runtime for unit tests

use crate::error::{StagehandError, StagehandResult};
use crate::orchestration::podman::{ContainerSpec, ImageConfigInspect, ImageInspect};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A runtime call as observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ContainerSpec),
    Start(String),
    Commit { name: String, changes: Vec<String> },
    Remove(String),
    Kill(String),
    CreateTooling { name: String, image: String },
    Inspect(String),
    Pull(String),
    RemoveImage(String),
    Tag { image: String, tag: String },
    Interactive(Vec<String>),
}

/// In-memory runtime that records every call
pub struct RecordingRuntime {
    calls: Mutex<Vec<Call>>,
    images: Mutex<HashMap<String, ImageInspect>>,
    containers: Mutex<HashMap<String, String>>,
    next_image: AtomicUsize,
    pub exit_code: Mutex<i32>,
    pub interactive_exit_code: Mutex<i32>,
    pub start_delay: Mutex<Option<Duration>>,
    pub fail_commit: Mutex<bool>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            images: Mutex::new(HashMap::new()),
            containers: Mutex::new(HashMap::new()),
            next_image: AtomicUsize::new(1),
            exit_code: Mutex::new(0),
            interactive_exit_code: Mutex::new(0),
            start_delay: Mutex::new(None),
            fail_commit: Mutex::new(false),
        }
    }

    /// Register a locally available image
    pub fn with_image(self, reference: &str, config: ImageConfigInspect) -> Self {
        let id = format!("sha256:{}", reference.replace([':', '/'], "-"));
        let inspect = ImageInspect { id, config };
        {
            let mut images = self.images.lock().unwrap();
            images.insert(inspect.id.clone(), inspect.clone());
            images.insert(reference.to_string(), inspect);
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn creates(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Commit { changes, .. } => Some(changes),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn is_available(&self) -> StagehandResult<bool> {
        Ok(true)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String> {
        self.record(Call::Create(spec.clone()));
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.image.clone());
        Ok(format!("container-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> StagehandResult<i32> {
        self.record(Call::Start(name.to_string()));
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(*self.exit_code.lock().unwrap())
    }

    async fn commit_container(&self, name: &str, changes: &[String]) -> StagehandResult<String> {
        self.record(Call::Commit {
            name: name.to_string(),
            changes: changes.to_vec(),
        });
        if *self.fail_commit.lock().unwrap() {
            return Err(StagehandError::ContainerCommit {
                name: name.to_string(),
                reason: "mock failure".to_string(),
            });
        }

        let n = self.next_image.fetch_add(1, Ordering::SeqCst);
        let id = format!("sha256:committed{n:04}");
        self.images.lock().unwrap().insert(
            id.clone(),
            ImageInspect {
                id: id.clone(),
                config: ImageConfigInspect::default(),
            },
        );
        Ok(id)
    }

    async fn remove_container(&self, name: &str) -> StagehandResult<()> {
        self.record(Call::Remove(name.to_string()));
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn kill_container(&self, name: &str) -> StagehandResult<()> {
        self.record(Call::Kill(name.to_string()));
        Ok(())
    }

    async fn create_tooling_container(&self, name: &str, image: &str) -> StagehandResult<()> {
        self.record(Call::CreateTooling {
            name: name.to_string(),
            image: image.to_string(),
        });
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), image.to_string());
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> StagehandResult<bool> {
        Ok(self.containers.lock().unwrap().contains_key(name))
    }

    async fn inspect_image(&self, image: &str) -> StagehandResult<Option<ImageInspect>> {
        self.record(Call::Inspect(image.to_string()));
        Ok(self.images.lock().unwrap().get(image).cloned())
    }

    async fn pull_image(&self, image: &str) -> StagehandResult<()> {
        self.record(Call::Pull(image.to_string()));
        Err(StagehandError::ImageMissing(image.to_string()))
    }

    async fn remove_image(&self, image: &str) -> StagehandResult<()> {
        self.record(Call::RemoveImage(image.to_string()));
        self.images.lock().unwrap().remove(image);
        Ok(())
    }

    async fn tag_image(&self, image: &str, tag: &str) -> StagehandResult<()> {
        self.record(Call::Tag {
            image: image.to_string(),
            tag: tag.to_string(),
        });
        let mut images = self.images.lock().unwrap();
        let inspect = images
            .get(image)
            .cloned()
            .ok_or_else(|| StagehandError::ImageMissing(image.to_string()))?;
        images.insert(tag.to_string(), inspect);
        Ok(())
    }

    async fn run_interactive(&self, args: &[String]) -> StagehandResult<i32> {
        self.record(Call::Interactive(args.to_vec()));
        Ok(*self.interactive_exit_code.lock().unwrap())
    }

    fn runtime_name(&self) -> &'static str {
        "Recording"
    }
}
