//! `corral start`: Release a created container.

use clap::Args;
use corral_common::config::RuntimeConfig;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container is not `created`.
pub fn execute(args: &StartArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    super::open(&args.id, runtime)?.exec()?;
    Ok(())
}
