//! `corral delete`: Remove a stopped container.

use std::time::{Duration, Instant};

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_common::error::CorralError;
use corral_common::types::Status;
use nix::sys::signal::Signal;

/// How long `--force` waits for killed processes to disappear.
const FORCE_GRACE: Duration = Duration::from_secs(5);

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Container ID.
    pub id: String,

    /// Kill every process in the container first.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `delete` command.
///
/// # Errors
///
/// Returns an error if the container is still running (without `--force`)
/// or cleanup fails.
pub fn execute(args: &DeleteArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let container = match super::open(&args.id, runtime) {
        Ok(c) => c,
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(e),
    };

    if args.force {
        if container.status()? != Status::Stopped {
            container.resume().or_else(|e| match e {
                CorralError::InvalidState { .. } => Ok(()),
                other => Err(other),
            })?;
            container.signal(Signal::SIGKILL, true)?;
        }
        let deadline = Instant::now() + FORCE_GRACE;
        while container.status()? != Status::Stopped || !container.processes()?.is_empty() {
            if Instant::now() >= deadline {
                anyhow::bail!("container {} did not stop within {FORCE_GRACE:?}", args.id);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    container.destroy()?;
    Ok(())
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CorralError>()
        .is_some_and(CorralError::is_not_found)
}
