//! `corral kill`: Send a signal to a container.

use std::str::FromStr;

use clap::Args;
use corral_common::config::RuntimeConfig;
use nix::sys::signal::Signal;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container ID.
    pub id: String,

    /// Signal name or number.
    #[arg(default_value = "SIGTERM", value_parser = parse_signal)]
    pub signal: Signal,

    /// Signal every process in the container, not just the init.
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the container is stopped or any delivery fails.
pub fn execute(args: &KillArgs, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    super::open(&args.id, runtime)?.signal(args.signal, args.all)?;
    Ok(())
}

/// Parses `TERM`, `SIGTERM` or `15`.
fn parse_signal(raw: &str) -> Result<Signal, String> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| format!("unknown signal number {number}"));
    }
    let upper = raw.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| format!("unknown signal {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_parse_by_name_and_number() {
        assert_eq!(parse_signal("TERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("sigkill").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("1").unwrap(), Signal::SIGHUP);
        assert!(parse_signal("NOPE").is_err());
        assert!(parse_signal("999").is_err());
    }
}
