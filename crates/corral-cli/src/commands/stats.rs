//! `corral stats`: Print resource usage of a container.

use clap::Args;
use corral_common::config::RuntimeConfig;

use crate::output::format_bytes;

/// Arguments for the `stats` command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Container ID.
    pub id: String,

    /// Print the raw snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `stats` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or its cgroup cannot
/// be read.
pub fn execute(args: &StatsArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let snapshot = super::open(&args.id, runtime)?.stats()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let limit = snapshot
        .memory_limit_bytes
        .map_or_else(|| "unlimited".to_string(), format_bytes);
    let percent = snapshot
        .memory_utilization()
        .map_or_else(|| "-".to_string(), |u| format!("{:.1}%", u * 100.0));
    println!(
        "{:<20} {:>12} {:>24} {:>7} {:>6} {:>12} {:>12}",
        "CONTAINER", "CPU (ms)", "MEMORY / LIMIT", "MEM %", "PIDS", "READ", "WRITE"
    );
    println!(
        "{:<20} {:>12} {:>24} {:>7} {:>6} {:>12} {:>12}",
        snapshot.container_id,
        snapshot.cpu_usage_usec / 1000,
        format!("{} / {limit}", format_bytes(snapshot.memory_usage_bytes)),
        percent,
        snapshot.pids,
        format_bytes(snapshot.io_read_bytes),
        format_bytes(snapshot.io_write_bytes),
    );
    Ok(())
}
