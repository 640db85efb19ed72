//! `corral create`: Create a container without running its command.

use std::path::PathBuf;

use clap::Args;
use corral_common::config::RuntimeConfig;

use super::ProcessArgs;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container ID. A random one is generated and printed when omitted.
    pub id: Option<String>,

    /// Bundle directory holding `corral.json`.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// File to write the init pid to.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Init process options.
    #[command(flatten)]
    pub process: ProcessArgs,
}

/// Executes the `create` command.
///
/// The container is left `created`; `corral start` runs its command.
///
/// # Errors
///
/// Returns an error if the container already exists or cannot be spawned.
pub fn execute(args: CreateArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let pid_file = args.pid_file.as_deref().map(super::absolute).transpose()?;
    let container = super::new_container(args.id.as_deref(), &args.bundle, runtime)?;
    if args.id.is_none() {
        println!("{}", container.id());
    }
    let mut init = args.process.into_process(true)?;

    container.run(&mut init)?;
    let pid = init.pid()?;
    super::write_pid_file(pid_file.as_deref(), pid)?;
    tracing::info!(id = %container.id(), pid, "created");
    Ok(())
}
