//! CLI command implementations

pub mod build;
pub mod config;
pub mod plan;
mod project;
pub mod registry;
pub mod sync;
pub mod values;

pub use build::execute as build;
pub use config::execute as config;
pub use plan::execute as plan;
pub use registry::execute as registry;
pub use sync::execute as sync;
pub use values::execute as values;
