//! Build containers
//!
//! - `BuildContainer`: one disposable container per stage build
//! - `ContainerOptions`: typed run/commit options with layered merging
//! - tooling container bootstrap

mod build;
mod options;
mod tooling;

pub use build::{
    is_start_container_error, shellout_pack, BaseImage, BuildContainer, ContainerSettings,
    ContainerState, IntrospectMode, IntrospectOutcome, CONTAINER_NAME_PREFIX,
};
pub use options::ContainerOptions;
pub use tooling::ensure_tooling_container;
