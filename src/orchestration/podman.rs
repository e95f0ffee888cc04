//! Shared runtime types
//!
//! Data structures exchanged with container runtimes. The docker and podman
//! CLIs both emit `image inspect` output in this shape.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image id or reference to create the container from
    pub image: String,
    /// Runtime flags (`--volume=...`, `--entrypoint=...`)
    pub args: Vec<String>,
    /// Arguments passed after the image
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Full argument list for `<runtime> create`
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string(), format!("--name={}", self.name)];
        args.extend(self.args.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Subset of `image inspect` output used by the build engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Id")]
    pub id: String,

    #[serde(rename = "Config", default)]
    pub config: ImageConfigInspect,
}

/// Runtime configuration baked into an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageConfigInspect {
    #[serde(rename = "Cmd", default, deserialize_with = "null_as_default")]
    pub cmd: Vec<String>,

    #[serde(rename = "Entrypoint", default, deserialize_with = "null_as_default")]
    pub entrypoint: Vec<String>,

    #[serde(rename = "User", default)]
    pub user: String,

    #[serde(rename = "WorkingDir", default)]
    pub working_dir: String,

    #[serde(rename = "Env", default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,

    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse `<runtime> image inspect` output (a JSON array)
pub fn parse_image_inspect(output: &str) -> Result<Option<ImageInspect>, serde_json::Error> {
    let mut images: Vec<ImageInspect> = serde_json::from_str(output)?;
    Ok(if images.is_empty() {
        None
    } else {
        Some(images.swap_remove(0))
    })
}
