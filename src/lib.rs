//! Stagehand - stage-based container image builder
//!
//! Splits every image into an ordered chain of content-addressed stages,
//! reuses cached stage images and builds the rest through the docker or
//! podman CLI.

pub mod cache;
pub mod cancel;
pub mod chart_values;
pub mod cli;
pub mod config;
pub mod container;
pub mod conveyor;
pub mod error;
pub mod git;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod secret_values;
pub mod signature;
pub mod stage;

pub use error::{StagehandError, StagehandResult};
