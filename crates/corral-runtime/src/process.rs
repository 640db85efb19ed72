//! Process descriptors and the handles bound to them once spawned.
//!
//! A [`Process`] describes what to run. Passing it to
//! [`Container::run`](crate::container::Container::run) or
//! [`Container::start`](crate::container::Container::start) binds it to an OS
//! process; from then on [`Process::wait`] and [`Process::signal`] dispatch
//! through a tagged handle that knows whether it is the container's init or
//! an additional process.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use corral_common::error::{CorralError, Result};
use corral_common::types::{ConsoleSize, NoNewPrivileges, Rlimit, User};
use corral_core::capability::Capability;
use nix::sys::signal::Signal;

use crate::backend::Platform;
use crate::handshake::ExecFifo;
use crate::io::ProcessIo;

/// Pid reported by a descriptor that has not been spawned.
pub const UNBOUND_PID: i32 = i32::MIN;

/// Pids of spawned processes that have not been waited on yet.
pub(crate) type Tracker = Arc<Mutex<BTreeSet<i32>>>;

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl ExitStatus {
    /// Shell-style exit code: the status for a normal exit, `128 + signo`
    /// for a signal.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal as i32,
        }
    }

    /// Returns `true` for a zero exit.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Everything needed to launch one process inside a container.
///
/// Stdio fields left as `None` are replaced by pipes at spawn time; the
/// caller's ends are then available through [`Process::take_io`].
#[derive(Debug, Default)]
pub struct Process {
    /// Program and arguments. `args[0]` is looked up on `PATH`.
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Identity to switch to before exec.
    pub user: User,
    /// Supplementary group IDs.
    pub additional_groups: Vec<u32>,
    /// Working directory inside the container. Defaults to `/`.
    pub cwd: Option<PathBuf>,
    /// Standard input to hand to the process.
    pub stdin: Option<OwnedFd>,
    /// Standard output to hand to the process.
    pub stdout: Option<OwnedFd>,
    /// Standard error to hand to the process.
    pub stderr: Option<OwnedFd>,
    /// Additional descriptors, inherited as fd 3, 4, ...
    pub extra_files: Vec<OwnedFd>,
    /// Initial terminal geometry applied to stdin when it is a tty.
    pub console_size: Option<ConsoleSize>,
    /// Capability bounding set. `None` keeps the inherited set.
    pub capabilities: Option<Vec<Capability>>,
    /// `AppArmor` profile to transition to on exec.
    pub apparmor_profile: Option<String>,
    /// `SELinux` process label applied on exec.
    pub label: Option<String>,
    /// Whether to set the no-new-privileges bit.
    pub no_new_privileges: NoNewPrivileges,
    /// Resource limits applied before exec.
    pub rlimits: Vec<Rlimit>,
    /// Sub-cgroup to join, keyed by controller. Only the unified key `""`
    /// is meaningful on cgroup v2.
    pub sub_cgroup_paths: BTreeMap<String, String>,
    /// Whether this is the container's init process.
    pub init: bool,
    io: Option<ProcessIo>,
    handle: Option<ProcessHandle>,
}

impl Process {
    /// Describes an additional process joining a running container.
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Describes the init process of a new container.
    #[must_use]
    pub fn init(args: Vec<String>) -> Self {
        Self {
            args,
            init: true,
            ..Self::default()
        }
    }

    /// Returns `true` once the descriptor has been spawned.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the host pid of the spawned process.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidProcess`] if the descriptor was never
    /// spawned.
    pub fn pid(&self) -> Result<i32> {
        self.handle
            .as_ref()
            .map(ProcessHandle::pid)
            .ok_or(CorralError::InvalidProcess)
    }

    /// Like [`Process::pid`], but reports [`UNBOUND_PID`] for an unbound
    /// descriptor.
    #[must_use]
    pub fn pid_or_sentinel(&self) -> i32 {
        self.pid().unwrap_or(UNBOUND_PID)
    }

    /// Waits for the process to exit and reaps it.
    ///
    /// The first successful wait caches the status; later calls return the
    /// cached value without touching the OS. Waiting on the init process also
    /// removes the container's exec handshake.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidProcess`] for an unbound descriptor, or
    /// an OS error if the process cannot be reaped.
    pub fn wait(&self) -> Result<ExitStatus> {
        self.handle
            .as_ref()
            .ok_or(CorralError::InvalidProcess)?
            .wait()
    }

    /// Sends `signal` to the process.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidProcess`] for an unbound descriptor and
    /// [`CorralError::ProcessExited`] once the exit status was collected.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        self.handle
            .as_ref()
            .ok_or(CorralError::InvalidProcess)?
            .signal(signal)
    }

    /// Takes the caller's ends of any pipes created at spawn time.
    ///
    /// Returns `None` if the process is unbound or the ends were already
    /// taken.
    pub fn take_io(&mut self) -> Option<ProcessIo> {
        self.io.take()
    }

    /// Convenience accessor for the stdout pipe, when one was created.
    pub fn take_stdout(&mut self) -> Option<File> {
        self.io.as_mut().and_then(|io| io.stdout.take())
    }

    pub(crate) fn bind(&mut self, handle: ProcessHandle, io: ProcessIo) {
        self.handle = Some(handle);
        self.io = Some(io);
    }
}

/// Which lifecycle role a spawned process plays.
#[derive(Debug)]
pub(crate) enum HandleKind {
    /// The container's first process; its exit stops the container.
    Init {
        /// Handshake removed once the init is reaped.
        handshake: ExecFifo,
    },
    /// A process that joined a running container.
    Exec,
}

/// OS-side half of a bound [`Process`].
pub(crate) struct ProcessHandle {
    pid: i32,
    kind: HandleKind,
    platform: Arc<dyn Platform>,
    tracker: Tracker,
    reap: Mutex<()>,
    exit: OnceLock<ExitStatus>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("kind", &self.kind)
            .field("exit", &self.exit.get())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub(crate) fn new(pid: i32, kind: HandleKind, platform: Arc<dyn Platform>, tracker: Tracker) -> Self {
        let _ = tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
        Self {
            pid,
            kind,
            platform,
            tracker,
            reap: Mutex::new(()),
            exit: OnceLock::new(),
        }
    }

    const fn pid(&self) -> i32 {
        self.pid
    }

    fn wait(&self) -> Result<ExitStatus> {
        let _reaping = self.reap.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = self.exit.get() {
            return Ok(*status);
        }

        let status = self.platform.wait(self.pid)?;
        if let HandleKind::Init { handshake } = &self.kind {
            if let Err(e) = handshake.remove() {
                tracing::warn!(pid = self.pid, error = %e, "failed to remove exec handshake");
            }
        }
        let _ = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pid);
        let _ = self.exit.set(status);
        tracing::debug!(pid = self.pid, code = status.code(), "process reaped");
        Ok(status)
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        if self.exit.get().is_some() {
            return Err(CorralError::ProcessExited { pid: self.pid });
        }
        self.platform.signal(self.pid, signal)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let _ = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pid);
    }
}
