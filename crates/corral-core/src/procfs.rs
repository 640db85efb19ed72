//! Process introspection through `/proc` and signal delivery.
//!
//! A pid alone does not identify a process: once it exits the kernel may
//! hand the same number to an unrelated process. Pairing a pid with its
//! start time (field 22 of `/proc/<pid>/stat`, clock ticks since boot)
//! gives a stable identity.

use corral_common::error::{CorralError, Result};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// The fields of `/proc/<pid>/stat` the runtime cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStat {
    /// Single-character scheduler state (`R`, `S`, `Z`, ...).
    pub state: char,
    /// Start time in clock ticks since boot.
    pub start_time: u64,
}

impl ProcessStat {
    /// Returns `true` for zombie or dead processes.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Parses the contents of `/proc/<pid>/stat`.
///
/// The command name in field 2 may contain spaces and parentheses, so
/// parsing starts after the last `)`.
#[must_use]
pub fn parse_stat(content: &str) -> Option<ProcessStat> {
    let rest = &content[content.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    // Field 3 is `state`; `starttime` is field 22, i.e. 19 further on.
    let start_time = fields.nth(18)?.parse().ok()?;
    Some(ProcessStat { state, start_time })
}

/// Reads the stat record of `pid`; `None` if no such process exists.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/stat` exists but cannot be read or
/// parsed.
pub fn stat(pid: i32) -> Result<Option<ProcessStat>> {
    if pid <= 0 {
        return Ok(None);
    }
    let path = format!("/proc/{pid}/stat");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CorralError::Io { path: path.into(), source: e }),
    };
    parse_stat(&content).map(Some).ok_or_else(|| CorralError::Io {
        path: path.into(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed stat record"),
    })
}

/// Returns the start time of a live `pid`, or `None` if it does not exist
/// or is a zombie.
///
/// # Errors
///
/// Returns an error if the stat record cannot be read.
pub fn start_time(pid: i32) -> Result<Option<u64>> {
    Ok(stat(pid)?.filter(|s| !s.is_dead()).map(|s| s.start_time))
}

/// Sends `signal` to exactly one process.
///
/// Non-positive pids are refused: `kill(2)` treats them as process-group or
/// broadcast targets.
///
/// # Errors
///
/// Returns [`CorralError::Os`] carrying the errno of a failed `kill(2)`.
pub fn send_signal(pid: i32, signal: Signal) -> Result<()> {
    if pid <= 0 {
        return Err(CorralError::Config {
            message: format!("refusing to signal pid {pid}"),
        });
    }
    nix::sys::signal::kill(Pid::from_raw(pid), signal).map_err(|e| CorralError::os("kill", e))?;
    tracing::debug!(pid, %signal, "signal delivered");
    Ok(())
}
