//! `corral ps`: List the processes of a container.

use clap::Args;
use corral_common::config::RuntimeConfig;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Container ID.
    pub id: String,

    /// Print a JSON array instead of one pid per line.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or its cgroup cannot
/// be read.
pub fn execute(args: &PsArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let pids = super::open(&args.id, runtime)?.processes()?;
    if args.json {
        println!("{}", serde_json::to_string(&pids)?);
        return Ok(());
    }
    println!("PID");
    for pid in pids {
        println!("{pid}");
    }
    Ok(())
}
