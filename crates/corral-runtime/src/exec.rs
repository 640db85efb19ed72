//! Spawning additional processes inside a running container.
//!
//! The child is cloned from a thread whose `pid_for_children` namespace has
//! been pointed at the container's, so it is born inside the container's pid
//! namespace. It then attaches itself to the container cgroup and joins the
//! remaining namespaces before running the usual setup pipeline.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_core::namespace::{self, NamespaceHandle, NamespaceKind};
use nix::fcntl::OFlag;
use nix::sched::CloneFlags;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use crate::backend::SpawnRequest;
use crate::backend::child::{self, ChildSetup};

/// Points the calling thread's `pid_for_children` at another pid namespace
/// and restores the original on drop.
struct PidNamespaceGuard {
    original: File,
}

impl PidNamespaceGuard {
    fn enter(target: &NamespaceHandle) -> Result<Self> {
        let path = "/proc/thread-self/ns/pid_for_children";
        let original = File::open(path).map_err(|e| CorralError::Io {
            path: path.into(),
            source: e,
        })?;
        namespace::join(target)?;
        Ok(Self { original })
    }
}

impl Drop for PidNamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = nix::sched::setns(self.original.as_fd(), CloneFlags::CLONE_NEWPID) {
            tracing::error!(error = %e, "failed to restore pid namespace of spawning thread");
        }
    }
}

/// Spawns the process described by `request` inside the namespaces and
/// cgroup of `init_pid`, returning once the command is executing.
///
/// # Errors
///
/// Returns an error if the init process is gone, a namespace cannot be
/// joined, or the child fails before exec.
pub(crate) fn spawn_in_container(
    init_pid: i32,
    procs: &Path,
    request: &SpawnRequest<'_>,
) -> Result<i32> {
    let (pid_ns, joins): (Vec<_>, Vec<_>) =
        namespace::open_namespaces(init_pid, &request.config.namespaces)?
            .into_iter()
            .partition(|h| h.kind == NamespaceKind::Pid);

    let (err_read, err_write) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::os("pipe2", e))?;
    let mut setup = ChildSetup::new(request)?
        .with_cgroup(procs)?
        .joining(joins)
        .reporting_to(&err_write);

    let pid = {
        let _pid_ns = pid_ns.first().map(PidNamespaceGuard::enter).transpose()?;
        crate::backend::linux::clone_child(&mut setup, CloneFlags::empty())?
    };
    drop(err_write);

    match child::read_failure(err_read) {
        Ok(None) => {
            tracing::debug!(id = %request.id, pid, init_pid, "joined running container");
            Ok(pid)
        }
        Ok(Some(err)) | Err(err) => {
            let _ = waitpid(Pid::from_raw(pid), None);
            Err(err)
        }
    }
}
