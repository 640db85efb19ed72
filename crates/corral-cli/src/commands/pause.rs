//! `corral pause` / `corral resume`: Freeze and thaw a container.

use clap::Args;
use corral_common::config::RuntimeConfig;

/// Arguments for the `pause` and `resume` commands.
#[derive(Args, Debug)]
pub struct PauseArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `pause` command.
///
/// # Errors
///
/// Returns an error if the container is not running.
pub fn pause(args: &PauseArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    super::open(&args.id, runtime)?.pause()?;
    Ok(())
}

/// Executes the `resume` command.
///
/// # Errors
///
/// Returns an error if the container is not paused.
pub fn resume(args: &PauseArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    super::open(&args.id, runtime)?.resume()?;
    Ok(())
}
