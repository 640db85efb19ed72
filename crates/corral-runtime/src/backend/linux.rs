//! Linux platform built on namespaces, cgroup v2 and procfs.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::{FreezeState, ResourceLimits};
use corral_core::cgroup::{CgroupManager, CgroupStats};
use corral_core::{namespace, procfs};
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use super::child::ChildSetup;
use super::{Platform, SpawnRequest};
use crate::process::ExitStatus;

/// Stack given to a cloned child. It only runs the setup pipeline.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// [`Platform`] for the local Linux kernel.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    cgroup_root: PathBuf,
}

impl LinuxPlatform {
    /// Creates a platform using the cgroup v2 hierarchy mounted at
    /// `cgroup_root`.
    #[must_use]
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    fn cgroup(&self, relative: &Path) -> CgroupManager {
        CgroupManager::new(&self.cgroup_root, relative)
    }

    /// Places the parked init in its cgroup and writes its id maps.
    fn finish_init(&self, pid: i32, request: &SpawnRequest<'_>) -> Result<()> {
        CgroupManager::create(&self.cgroup_root, &request.process_cgroup())?.add_process(pid)?;
        if request.config.namespaces.user {
            namespace::user::write_id_mappings(
                pid,
                &request.config.uid_mappings,
                &request.config.gid_mappings,
            )?;
        }
        Ok(())
    }
}

impl Platform for LinuxPlatform {
    fn spawn_init(&self, request: SpawnRequest<'_>) -> Result<i32> {
        let handshake = request.handshake.ok_or_else(|| CorralError::Config {
            message: "init process requires an exec handshake".into(),
        })?;

        let cgroup = CgroupManager::create(&self.cgroup_root, &request.cgroup)?;
        if !request.config.resources.is_empty() {
            let applied = cgroup
                .validate_limits(&request.config.resources)
                .and_then(|()| cgroup.apply_limits(&request.config.resources));
            if let Err(e) = applied {
                let _ = cgroup.destroy();
                return Err(e);
            }
        }

        let spawned = open_path(handshake).and_then(|fifo| {
            let mut setup = ChildSetup::new(&request)?.with_handshake(&fifo)?;
            clone_child(&mut setup, namespace::clone_flags(&request.config.namespaces))
        });
        let pid = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                let _ = cgroup.destroy();
                return Err(e);
            }
        };

        if let Err(e) = self.finish_init(pid, &request) {
            tracing::warn!(id = %request.id, pid, error = %e, "init setup failed, killing");
            let _ = procfs::send_signal(pid, Signal::SIGKILL);
            let _ = waitpid(Pid::from_raw(pid), None);
            let _ = cgroup.destroy();
            return Err(e);
        }

        tracing::info!(id = %request.id, pid, cgroup = %cgroup.path().display(), "init process parked at exec handshake");
        Ok(pid)
    }

    fn spawn_exec(&self, init_pid: i32, request: SpawnRequest<'_>) -> Result<i32> {
        let target = request.process_cgroup();
        let cgroup = if target == request.cgroup {
            self.cgroup(&target)
        } else {
            CgroupManager::create(&self.cgroup_root, &target)?
        };
        crate::exec::spawn_in_container(init_pid, &cgroup.path().join("cgroup.procs"), &request)
    }

    fn wait(&self, pid: i32) -> Result<ExitStatus> {
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ExitStatus::Signaled(signal)),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(CorralError::os("waitpid", e)),
            }
        }
    }

    fn signal(&self, pid: i32, signal: Signal) -> Result<()> {
        procfs::send_signal(pid, signal)
    }

    fn start_time(&self, pid: i32) -> Result<Option<u64>> {
        procfs::start_time(pid)
    }

    fn freeze_state(&self, cgroup: &Path) -> Result<FreezeState> {
        self.cgroup(cgroup).freeze_state()
    }

    fn set_frozen(&self, cgroup: &Path, frozen: bool) -> Result<()> {
        self.cgroup(cgroup).set_frozen(frozen)
    }

    fn pids(&self, cgroup: &Path) -> Result<Vec<i32>> {
        self.cgroup(cgroup).pids()
    }

    fn stats(&self, cgroup: &Path) -> Result<CgroupStats> {
        self.cgroup(cgroup).stats()
    }

    fn validate_resources(&self, cgroup: &Path, limits: &ResourceLimits) -> Result<()> {
        self.cgroup(cgroup).validate_limits(limits)
    }

    fn apply_resources(&self, cgroup: &Path, limits: &ResourceLimits) -> Result<()> {
        self.cgroup(cgroup).apply_limits(limits)
    }

    fn destroy_cgroup(&self, cgroup: &Path) -> Result<()> {
        self.cgroup(cgroup).destroy()
    }
}

/// Clones a child that runs `setup` and returns its host pid.
pub(crate) fn clone_child(setup: &mut ChildSetup, flags: CloneFlags) -> Result<i32> {
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let callback = Box::new(|| setup.run());
    // SAFETY: the child gets a private copy of the address space and only
    // runs `ChildSetup::run`, which issues system calls on data prepared
    // before the clone.
    let pid = unsafe { nix::sched::clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| CorralError::os("clone", e))?;
    Ok(pid.as_raw())
}

/// Opens `path` without following it, for reopening through `/proc`.
fn open_path(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH | libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}
