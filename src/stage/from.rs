//! Base image stage

use crate::error::{StagehandError, StagehandResult};
use crate::stage::{BuildContext, StageKind};

/// Starts the chain from a base image reference
#[derive(Debug, Clone)]
pub struct FromStage {
    reference: String,
}

impl FromStage {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The reference, plus the resolved image id so a re-pulled tag
    /// invalidates everything built on top of it
    pub fn dependencies(&self, ctx: &BuildContext) -> Vec<String> {
        let mut inputs = vec![self.reference.clone()];
        inputs.extend(ctx.base_image_id.clone());
        inputs
    }

    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        if self.reference.trim().is_empty() {
            return Err(StagehandError::stage_config(
                image,
                StageKind::From.name(),
                "base image is not set",
            ));
        }
        if self.reference.chars().any(char::is_whitespace) {
            return Err(StagehandError::stage_config(
                image,
                StageKind::From.name(),
                format!("base image '{}' contains whitespace", self.reference),
            ));
        }
        Ok(())
    }
}
