//! Stdio plumbing between the caller and a spawned process.

use std::fs::File;
use std::os::fd::OwnedFd;

use corral_common::error::{CorralError, Result};
use nix::fcntl::OFlag;

use crate::process::Process;

/// The caller's ends of pipes created for a process.
///
/// A field is `None` when the caller supplied that stream directly.
#[derive(Debug, Default)]
pub struct ProcessIo {
    /// Writable end connected to the process's stdin.
    pub stdin: Option<File>,
    /// Readable end connected to the process's stdout.
    pub stdout: Option<File>,
    /// Readable end connected to the process's stderr.
    pub stderr: Option<File>,
}

/// The descriptors that become fds 0, 1 and 2 in the child.
///
/// Dropping this after spawn closes the runtime's copies, so EOF propagates
/// once the child exits.
#[derive(Debug)]
pub struct ChildStdio {
    /// Becomes fd 0.
    pub stdin: OwnedFd,
    /// Becomes fd 1.
    pub stdout: OwnedFd,
    /// Becomes fd 2.
    pub stderr: OwnedFd,
    /// Which of stdin, stdout and stderr came from the caller.
    supplied: [bool; 3],
}

impl ChildStdio {
    /// Hands the caller's own descriptors back to `process` after a failed
    /// spawn. Pipe ends created by [`prepare`] are closed.
    pub(crate) fn restore(self, process: &mut Process) {
        let [stdin, stdout, stderr] = self.supplied;
        if stdin {
            process.stdin = Some(self.stdin);
        }
        if stdout {
            process.stdout = Some(self.stdout);
        }
        if stderr {
            process.stderr = Some(self.stderr);
        }
    }
}

/// Takes the stdio the caller placed on `process`, creating a close-on-exec
/// pipe for each stream left unset.
///
/// Pipes are created before anything is taken, so on error `process` is
/// left untouched.
///
/// # Errors
///
/// Returns an error if a pipe cannot be created.
pub(crate) fn prepare(process: &mut Process) -> Result<(ChildStdio, ProcessIo)> {
    let stdin_pipe = process.stdin.is_none().then(pipe).transpose()?;
    let stdout_pipe = process.stdout.is_none().then(pipe).transpose()?;
    let stderr_pipe = process.stderr.is_none().then(pipe).transpose()?;
    let supplied = [
        stdin_pipe.is_none(),
        stdout_pipe.is_none(),
        stderr_pipe.is_none(),
    ];

    let mut io = ProcessIo::default();
    let stdin = match (process.stdin.take(), stdin_pipe) {
        (Some(fd), _) => fd,
        (None, Some((read, write))) => {
            io.stdin = Some(File::from(write));
            read
        }
        (None, None) => unreachable!("pipe created for unset stdin"),
    };
    let stdout = match (process.stdout.take(), stdout_pipe) {
        (Some(fd), _) => fd,
        (None, Some((read, write))) => {
            io.stdout = Some(File::from(read));
            write
        }
        (None, None) => unreachable!("pipe created for unset stdout"),
    };
    let stderr = match (process.stderr.take(), stderr_pipe) {
        (Some(fd), _) => fd,
        (None, Some((read, write))) => {
            io.stderr = Some(File::from(read));
            write
        }
        (None, None) => unreachable!("pipe created for unset stderr"),
    };

    Ok((
        ChildStdio {
            stdin,
            stdout,
            stderr,
            supplied,
        },
        io,
    ))
}

fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::os("pipe2", e))
}
