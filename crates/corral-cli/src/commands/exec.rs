//! `corral exec`: Execute a command inside a running container.

use clap::Args;
use corral_common::config::RuntimeConfig;

use super::ProcessArgs;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID.
    pub id: String,

    /// Process options.
    #[command(flatten)]
    pub process: ProcessArgs,
}

/// Executes the `exec` command.
///
/// Joins the container's namespaces and cgroup, forwards this terminal's
/// stdio, and exits with the command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or the command cannot
/// be spawned.
pub fn execute(args: ExecArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let container = super::open(&args.id, runtime)?;
    let mut process = args.process.into_process(false)?;

    container.start(&mut process)?;
    let status = process.wait()?;
    tracing::debug!(id = %container.id(), pid = process.pid_or_sentinel(), code = status.code(), "exec finished");
    std::process::exit(status.code());
}
