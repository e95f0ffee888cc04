//! Image metadata stage
//!
//! Runs nothing; applies volumes, ports, env, labels and process settings as
//! commit changes on the final image.

use crate::config::schema::DockerConfig;
use crate::container::BuildContainer;
use crate::error::{StagehandError, StagehandResult};
use crate::signature::SignatureInputs;
use crate::stage::{push_list, StageKind};

#[derive(Debug, Clone)]
pub struct DockerInstructionsStage {
    instructions: DockerConfig,
}

impl DockerInstructionsStage {
    pub fn new(instructions: DockerConfig) -> Self {
        Self { instructions }
    }

    pub fn dependencies(&self) -> Vec<String> {
        let docker = &self.instructions;
        let mut inputs = SignatureInputs::new();

        push_list(&mut inputs, &docker.volume);
        push_list(&mut inputs, &docker.expose);
        inputs.push(docker.env.len().to_string()).push_map(&docker.env);
        inputs.push(docker.label.len().to_string()).push_map(&docker.label);
        push_list(&mut inputs, &docker.cmd);
        push_list(&mut inputs, &docker.onbuild);
        push_list(&mut inputs, &docker.entrypoint);
        inputs
            .push_opt(docker.workdir.as_deref())
            .push_opt(docker.user.as_deref())
            .push_opt(docker.stop_signal.as_deref())
            .push_opt(docker.healthcheck.as_deref());

        inputs.into_vec()
    }

    pub fn prepare_image(&self, container: &mut BuildContainer) {
        let docker = &self.instructions;
        let options = container.commit_change_options_mut();

        options.volumes.extend(docker.volume.iter().cloned());
        options.expose.extend(docker.expose.iter().cloned());
        options
            .env
            .extend(docker.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        options
            .labels
            .extend(docker.label.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !docker.cmd.is_empty() {
            options.cmd = Some(docker.cmd.clone());
        }
        options.onbuild.extend(docker.onbuild.iter().cloned());
        if !docker.entrypoint.is_empty() {
            options.entrypoint = Some(docker.entrypoint.clone());
        }
        options.workdir = docker.workdir.clone();
        options.user = docker.user.clone();
        options.stop_signal = docker.stop_signal.clone();
        options.healthcheck = docker.healthcheck.clone();
    }

    pub fn validate(&self, image: &str) -> StagehandResult<()> {
        let invalid = |reason: String| {
            StagehandError::stage_config(image, StageKind::DockerInstructions.name(), reason)
        };

        if let Some(key) = self
            .instructions
            .env
            .keys()
            .find(|k| k.is_empty() || k.contains(['=', ' ']))
        {
            return Err(invalid(format!("invalid env name '{}'", key)));
        }
        if let Some(healthcheck) = &self.instructions.healthcheck {
            validate_healthcheck(healthcheck).map_err(invalid)?;
        }
        Ok(())
    }
}

/// `[--opt=value ...] CMD <command>` or `NONE`
fn validate_healthcheck(healthcheck: &str) -> Result<(), String> {
    let mut words = healthcheck.split_whitespace().skip_while(|w| w.starts_with("--"));

    match words.next() {
        Some("NONE") if words.next().is_none() => Ok(()),
        Some("CMD") if words.next().is_some() => Ok(()),
        Some("CMD") => Err("healthcheck CMD has no command".to_string()),
        _ => Err(format!(
            "malformed healthcheck '{}', expected 'CMD <command>' or 'NONE'",
            healthcheck
        )),
    }
}
