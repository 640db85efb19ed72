//! Unified error types for the Corral workspace.
//!
//! Every lifecycle failure is returned to the caller as one of these typed
//! conditions; nothing in the library crates exits the host process.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A single failed delivery inside a broadcast signal.
#[derive(Debug)]
pub struct SignalFailure {
    /// Target process.
    pub pid: i32,
    /// Why delivery failed.
    pub source: std::io::Error,
}

impl fmt::Display for SignalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}: {}", self.pid, self.source)
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// A record or process no longer exists, possibly removed by another
    /// runtime invocation.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation is not legal for the container's current status.
    #[error("cannot {operation} container {id} while it is {status}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// Status observed when the operation was attempted.
        status: String,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// The process descriptor is not bound to an OS process, or was already
    /// bound by an earlier spawn.
    #[error("invalid process")]
    InvalidProcess,

    /// The exec handshake was already released.
    #[error("container {id} has already been executed")]
    AlreadyExecuted {
        /// Container identifier.
        id: String,
    },

    /// Some deliveries of a broadcast signal failed. Successful deliveries
    /// are not undone.
    #[error("signal delivered to {delivered} process(es), failed for {}", format_failures(.failures))]
    PartialSignal {
        /// Number of processes that received the signal.
        delivered: usize,
        /// Per-pid failures.
        failures: Vec<SignalFailure>,
    },

    /// A resource update was refused; nothing was left partially applied.
    #[error("configuration rejected: {message}")]
    ConfigRejected {
        /// Why the configuration was refused.
        message: String,
    },

    /// The init process never opened its end of the exec handshake.
    #[error("timed out after {timeout:?} waiting for container {id} to reach the exec handshake")]
    HandshakeTimeout {
        /// Container identifier.
        id: String,
        /// Bound that expired.
        timeout: Duration,
    },

    /// Processes are still present in the container's cgroup.
    #[error("container {id} still has running processes: {pids:?}")]
    Busy {
        /// Container identifier.
        id: String,
        /// Pids found in the cgroup.
        pids: Vec<i32>,
    },

    /// The process exit status was already collected.
    #[error("process {pid} has already exited")]
    ProcessExited {
        /// Former pid of the process.
        pid: i32,
    },

    /// A caller-supplied value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{operation} failed: {source}")]
    Os {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Os`] from a raw OS error (an errno value or
    /// anything convertible into [`std::io::Error`]).
    pub fn os(operation: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Os {
            operation,
            source: source.into(),
        }
    }

    /// Returns `true` when this error reports a missing record or process.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn format_failures(failures: &[SignalFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_signal_lists_every_failed_pid() {
        let err = CorralError::PartialSignal {
            delivered: 2,
            failures: vec![
                SignalFailure {
                    pid: 41,
                    source: std::io::Error::other("no such process"),
                },
                SignalFailure {
                    pid: 42,
                    source: std::io::Error::other("no such process"),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("signal delivered to 2 process(es)"));
        assert!(msg.contains("pid 41"));
        assert!(msg.contains("pid 42"));
    }

    #[test]
    fn invalid_state_names_operation_and_status() {
        let err = CorralError::InvalidState {
            id: "c1".into(),
            status: "running".into(),
            operation: "destroy",
        };
        assert_eq!(err.to_string(), "cannot destroy container c1 while it is running");
    }

    #[test]
    fn not_found_is_detected() {
        let err = CorralError::NotFound {
            kind: "container",
            id: "gone".into(),
        };
        assert!(err.is_not_found());
        assert!(!CorralError::InvalidProcess.is_not_found());
    }
}
