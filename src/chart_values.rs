//! Service values handed to deployment charts
//!
//! Charts reference built images through a `stagehand` values block instead
//! of hard-coded tags.

use serde_json::{json, Map, Value};
use tracing::debug;

/// A built image as seen by charts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartImage {
    /// Image name from the configuration; empty for the nameless image
    pub name: String,
    /// Full pushed reference (`<repo>:<tag>`)
    pub reference: String,
}

impl ChartImage {
    pub fn is_nameless(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceValuesOptions {
    pub env: Option<String>,
    /// Render placeholder references (`<repo>:TAG`) for chart linting
    pub is_stub: bool,
}

/// Build the `{"stagehand": {...}}` values block
pub fn service_values(
    project: &str,
    repo: &str,
    namespace: &str,
    images: &[ChartImage],
    opts: &ServiceValuesOptions,
) -> Value {
    let mut info = Map::new();
    info.insert("name".to_string(), json!(project));
    info.insert("repo".to_string(), json!(repo));
    info.insert("namespace".to_string(), json!(namespace));
    info.insert("is_stub".to_string(), json!(opts.is_stub));

    if opts.is_stub {
        info.insert("stub_image".to_string(), json!(format!("{}:TAG", repo)));
    }
    if let Some(env) = opts.env.as_deref().filter(|e| !e.is_empty()) {
        info.insert("env".to_string(), json!(env));
    }

    for image in images {
        if image.is_nameless() {
            info.insert("is_nameless_image".to_string(), json!(true));
            info.insert("image".to_string(), json!(image.reference));
        } else {
            let entry = info
                .entry("image".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(named) = entry {
                named.insert(image.name.clone(), json!(image.reference));
            }
        }
    }

    let values = json!({ "stagehand": Value::Object(info) });
    debug!("Service values: {}", values);
    values
}
