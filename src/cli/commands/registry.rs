//! Registry command - registry maintenance through adapter APIs

use crate::cli::args::{RegistryAction, RegistryArgs};
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::registry::{parse_reference, DeleteRepoOutcome, QuayRegistry, RegistryAdapter};
use console::style;

/// Execute the registry command
pub async fn execute(args: RegistryArgs, _config: &Config) -> StagehandResult<()> {
    match args.action {
        RegistryAction::DeleteRepo { reference, token } => {
            let adapter = adapter_for(&reference, token)?;
            match adapter.delete_repo(&reference).await? {
                DeleteRepoOutcome::Deleted => {
                    println!("{} Deleted {}", style("✓").green(), reference)
                }
                DeleteRepoOutcome::NotFound => println!(
                    "{} {} does not exist",
                    style("-").dim(),
                    reference
                ),
            }
        }
    }

    Ok(())
}

/// Adapter serving the registry host of `reference`
fn adapter_for(reference: &str, token: String) -> StagehandResult<Box<dyn RegistryAdapter>> {
    let parsed = parse_reference(reference)?;
    if QuayRegistry::matches_host(&parsed.host) {
        return Ok(Box::new(QuayRegistry::new(token)));
    }

    Err(StagehandError::Registry {
        registry: parsed.host,
        reason: "repository deletion is only supported for Quay registries".to_string(),
    })
}
