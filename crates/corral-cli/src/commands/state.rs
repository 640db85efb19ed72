//! `corral state`: Print the OCI state of a container.

use clap::Args;
use corral_common::config::RuntimeConfig;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `state` command.
///
/// # Errors
///
/// Returns an error if the container does not exist.
pub fn execute(args: &StateArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let state = super::open(&args.id, runtime)?.oci_state()?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
