//! `corral run`: Create, start and wait for a container in the foreground.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use corral_common::config::RuntimeConfig;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::ProcessArgs;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container ID. A random one is generated and printed when omitted.
    pub id: Option<String>,

    /// Bundle directory holding `corral.json`.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// File to write the init pid to.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Keep the container record after it exits.
    #[arg(long)]
    pub keep: bool,

    /// Init process options.
    #[command(flatten)]
    pub process: ProcessArgs,
}

/// Executes the `run` command.
///
/// Ctrl+C is forwarded to the init process as `SIGTERM`. The CLI exits with
/// the container's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be created or started.
pub fn execute(args: RunArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let pid_file = args.pid_file.as_deref().map(super::absolute).transpose()?;
    let container = super::new_container(args.id.as_deref(), &args.bundle, runtime)?;
    if args.id.is_none() {
        println!("{}", container.id());
    }
    let mut init = args.process.into_process(true)?;

    container.run(&mut init)?;
    let pid = init.pid()?;
    super::write_pid_file(pid_file.as_deref(), pid)?;

    ctrlc::set_handler(move || {
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
    })
    .context("failed to set Ctrl+C handler")?;

    if let Err(e) = container.exec() {
        let _ = init.signal(Signal::SIGKILL);
        let _ = init.wait();
        let _ = container.destroy();
        return Err(e.into());
    }

    let status = init.wait()?;
    tracing::info!(id = %container.id(), code = status.code(), "container exited");
    if !args.keep {
        if let Err(e) = container.destroy() {
            tracing::warn!(id = %container.id(), error = %e, "failed to clean up container");
        }
    }
    std::process::exit(status.code());
}
