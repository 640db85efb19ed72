//! The operating-system boundary of the lifecycle manager.
//!
//! [`Container`](crate::container::Container) never touches namespaces,
//! cgroups or `/proc` directly; it goes through a [`Platform`]. The Linux
//! implementation lives in [`linux`]; tests substitute a fake.

#[cfg(target_os = "linux")]
pub(crate) mod child;
#[cfg(target_os = "linux")]
pub mod linux;

use std::path::{Path, PathBuf};

use corral_common::config::ContainerConfig;
use corral_common::error::Result;
use corral_common::types::{ContainerId, FreezeState, ResourceLimits};
use corral_core::cgroup::CgroupStats;
use nix::sys::signal::Signal;

use crate::io::ChildStdio;
use crate::process::{ExitStatus, Process};

/// Everything a platform needs to launch one process.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    /// Container the process belongs to.
    pub id: &'a ContainerId,
    /// Container configuration.
    pub config: &'a ContainerConfig,
    /// Container cgroup, relative to the hierarchy root.
    pub cgroup: PathBuf,
    /// The process description.
    pub process: &'a Process,
    /// Descriptors that become the child's stdio.
    pub stdio: &'a ChildStdio,
    /// FIFO the init process must block on before running its command.
    /// `None` for processes joining a running container.
    pub handshake: Option<&'a Path>,
}

impl SpawnRequest<'_> {
    /// The cgroup the process is placed in: the container cgroup, or the
    /// unified sub-cgroup the process asked for.
    #[must_use]
    pub fn process_cgroup(&self) -> PathBuf {
        match self.process.sub_cgroup_paths.get("") {
            Some(sub) if !sub.is_empty() => self.cgroup.join(sub),
            _ => self.cgroup.clone(),
        }
    }
}

/// Narrow interface over the kernel facilities the lifecycle manager uses.
///
/// Cgroup paths are relative to the hierarchy root the platform was
/// configured with.
pub trait Platform: Send + Sync {
    /// Creates the container cgroup and namespaces and spawns the init
    /// process, which stays parked on the request's handshake. Returns the
    /// host pid.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; nothing is left running.
    fn spawn_init(&self, request: SpawnRequest<'_>) -> Result<i32>;

    /// Spawns a process inside the namespaces and cgroup of the running
    /// init `init_pid`. Returns the host pid once the command is executing.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespaces cannot be joined or the command
    /// cannot be executed.
    fn spawn_exec(&self, init_pid: i32, request: SpawnRequest<'_>) -> Result<i32>;

    /// Blocks until `pid` exits and reaps it.
    ///
    /// # Errors
    ///
    /// Returns an error if `pid` is not a child of this runtime.
    fn wait(&self, pid: i32) -> Result<ExitStatus>;

    /// Delivers `signal` to `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Os`](corral_common::error::CorralError::Os)
    /// carrying the delivery errno.
    fn signal(&self, pid: i32, signal: Signal) -> Result<()>;

    /// Start time of a live, non-zombie `pid`; `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if process information cannot be read.
    fn start_time(&self, pid: i32) -> Result<Option<u64>>;

    /// Freezer state of a cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer files cannot be read.
    fn freeze_state(&self, cgroup: &Path) -> Result<FreezeState>;

    /// Requests that a cgroup be frozen or thawed.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be written.
    fn set_frozen(&self, cgroup: &Path, frozen: bool) -> Result<()>;

    /// Pids currently in a cgroup and its descendants.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership files cannot be read.
    fn pids(&self, cgroup: &Path) -> Result<Vec<i32>>;

    /// Resource usage of a cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read.
    fn stats(&self, cgroup: &Path) -> Result<CgroupStats>;

    /// Checks `limits` against a cgroup without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ConfigRejected`](corral_common::error::CorralError::ConfigRejected)
    /// if the limits cannot be applied.
    fn validate_resources(&self, cgroup: &Path, limits: &ResourceLimits) -> Result<()>;

    /// Writes `limits` to a cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error on the first write that fails.
    fn apply_resources(&self, cgroup: &Path, limits: &ResourceLimits) -> Result<()>;

    /// Removes a cgroup. A missing cgroup is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup still has members or cannot be
    /// removed.
    fn destroy_cgroup(&self, cgroup: &Path) -> Result<()>;
}
