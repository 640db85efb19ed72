//! `corral list`: List known containers.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::state::{FileStateStore, StateStore};

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print only container IDs.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `list` command.
///
/// Containers removed by another invocation while listing are skipped.
///
/// # Errors
///
/// Returns an error if the state root cannot be read.
pub fn execute(args: &ListArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let ids = FileStateStore::new(&runtime.root).list()?;
    if args.quiet {
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    }

    println!(
        "{:<24} {:<8} {:<10} {:<26} {}",
        "ID", "PID", "STATUS", "CREATED", "BUNDLE"
    );
    for id in ids {
        let Ok(container) = super::open(id.as_str(), runtime) else {
            continue;
        };
        let (Ok(state), Ok(record)) = (container.oci_state(), container.record()) else {
            continue;
        };
        println!(
            "{:<24} {:<8} {:<10} {:<26} {}",
            state.id,
            state.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
            state.status,
            record.created.to_rfc3339(),
            state.bundle.display()
        );
    }
    Ok(())
}
