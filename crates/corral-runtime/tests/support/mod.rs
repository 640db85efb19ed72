//! In-memory [`Platform`] used to drive the lifecycle manager without a
//! kernel.
//!
//! Spawned "processes" are table entries. A spawned init parks a thread on
//! the real exec FIFO, so the handshake is exercised end to end.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use corral_common::config::{ContainerConfig, RuntimeConfig};
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, FreezeState, ResourceLimits};
use corral_core::cgroup::CgroupStats;
use corral_runtime::backend::{Platform, SpawnRequest};
use corral_runtime::state::FileStateStore;
use corral_runtime::{Container, ExitStatus};
use nix::sys::signal::Signal;

const FIRST_PID: i32 = 1000;

#[derive(Debug)]
struct FakeProcess {
    start_time: u64,
    exit: Option<ExitStatus>,
    reaped: bool,
    /// Pid 1 of its own pid namespace: the kernel only delivers signals
    /// it has handlers for, and `sleep` has none, so only SIGKILL ends it.
    namespace_init: bool,
}

#[derive(Debug)]
struct FakeCgroup {
    pids: BTreeSet<i32>,
    freeze: FreezeState,
    resources: ResourceLimits,
}

#[derive(Debug, Default)]
struct FakeState {
    next_pid: i32,
    processes: HashMap<i32, FakeProcess>,
    cgroups: HashMap<PathBuf, FakeCgroup>,
    refused: HashSet<i32>,
    signals: Vec<(i32, Signal)>,
    applied: Vec<ResourceLimits>,
    fail_next_apply: bool,
    fail_next_spawn: bool,
    skip_handshake: bool,
}

/// Kernel stand-in recording everything the manager asks of it.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    exited: Condvar,
}

impl FakePlatform {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn allocate(state: &mut FakeState, cgroup: &Path) -> i32 {
        if state.next_pid == 0 {
            state.next_pid = FIRST_PID;
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        let _ = state.processes.insert(
            pid,
            FakeProcess {
                start_time: 50_000 + u64::try_from(pid).unwrap(),
                exit: None,
                reaped: false,
                namespace_init: false,
            },
        );
        let _ = state
            .cgroups
            .get_mut(cgroup)
            .expect("cgroup exists")
            .pids
            .insert(pid);
        pid
    }

    fn terminate(state: &mut FakeState, pid: i32, status: ExitStatus) {
        if let Some(process) = state.processes.get_mut(&pid) {
            process.exit = Some(status);
        }
        for cgroup in state.cgroups.values_mut() {
            let _ = cgroup.pids.remove(&pid);
        }
    }

    /// Makes `pid` exit with `code`, as if its command finished.
    pub fn exit(&self, pid: i32, code: i32) {
        Self::terminate(&mut self.state(), pid, ExitStatus::Exited(code));
        self.exited.notify_all();
    }

    /// Simulates the kernel handing `pid` to an unrelated process.
    pub fn reuse_pid(&self, pid: i32) {
        let mut state = self.state();
        let process = state.processes.get_mut(&pid).expect("known pid");
        process.start_time += 1;
        process.exit = None;
    }

    /// Makes every delivery to `pid` fail with `ESRCH`.
    pub fn refuse_signals_to(&self, pid: i32) {
        let _ = self.state().refused.insert(pid);
    }

    /// Adds a process to `cgroup` that the manager did not spawn.
    pub fn add_stray(&self, cgroup: &Path) -> i32 {
        let mut state = self.state();
        Self::allocate(&mut state, cgroup)
    }

    /// Forces the freezer state of `cgroup`.
    pub fn set_freeze(&self, cgroup: &Path, freeze: FreezeState) {
        self.state().cgroups.get_mut(cgroup).expect("cgroup exists").freeze = freeze;
    }

    /// Makes the next resource write fail.
    pub fn fail_next_apply(&self) {
        self.state().fail_next_apply = true;
    }

    /// Makes the next spawn fail before a process exists.
    pub fn fail_next_spawn(&self) {
        self.state().fail_next_spawn = true;
    }

    /// Spawned inits never open the exec FIFO.
    pub fn skip_handshake(&self) {
        self.state().skip_handshake = true;
    }

    /// Every successful delivery, in order.
    pub fn signals(&self) -> Vec<(i32, Signal)> {
        self.state().signals.clone()
    }

    /// Every resource set written, in order.
    pub fn applied(&self) -> Vec<ResourceLimits> {
        self.state().applied.clone()
    }

    /// Whether `cgroup` currently exists.
    pub fn has_cgroup(&self, cgroup: &Path) -> bool {
        self.state().cgroups.contains_key(cgroup)
    }
}

fn esrch() -> CorralError {
    CorralError::os("kill", std::io::Error::from_raw_os_error(libc::ESRCH))
}

impl Platform for FakePlatform {
    fn spawn_init(&self, request: SpawnRequest<'_>) -> Result<i32> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_spawn) {
            return Err(CorralError::os(
                "clone3",
                std::io::Error::from_raw_os_error(libc::EAGAIN),
            ));
        }
        let _ = state.cgroups.insert(
            request.cgroup.clone(),
            FakeCgroup {
                pids: BTreeSet::new(),
                freeze: FreezeState::Thawed,
                resources: request.config.resources.clone(),
            },
        );
        let pid = Self::allocate(&mut state, &request.cgroup);
        if let Some(process) = state.processes.get_mut(&pid) {
            process.namespace_init = request.config.namespaces.pid;
        }

        if !state.skip_handshake {
            let fifo = request.handshake.expect("init has a handshake").to_path_buf();
            let _parked = std::thread::spawn(move || {
                if let Ok(mut reader) = File::open(fifo) {
                    let _ = reader.read(&mut [0u8; 1]);
                }
            });
        }
        Ok(pid)
    }

    fn spawn_exec(&self, init_pid: i32, request: SpawnRequest<'_>) -> Result<i32> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_spawn) {
            return Err(CorralError::os(
                "clone3",
                std::io::Error::from_raw_os_error(libc::EAGAIN),
            ));
        }
        let alive = state
            .processes
            .get(&init_pid)
            .is_some_and(|p| p.exit.is_none());
        if !alive {
            return Err(CorralError::NotFound {
                kind: "process",
                id: init_pid.to_string(),
            });
        }
        Ok(Self::allocate(&mut state, &request.cgroup))
    }

    fn wait(&self, pid: i32) -> Result<ExitStatus> {
        let mut state = self.state();
        loop {
            let process = state
                .processes
                .get_mut(&pid)
                .ok_or_else(|| CorralError::os("waitpid", std::io::Error::from_raw_os_error(libc::ECHILD)))?;
            if process.reaped {
                return Err(CorralError::os("waitpid", std::io::Error::from_raw_os_error(libc::ECHILD)));
            }
            if let Some(status) = process.exit {
                process.reaped = true;
                return Ok(status);
            }
            state = self.exited.wait(state).unwrap();
        }
    }

    fn signal(&self, pid: i32, signal: Signal) -> Result<()> {
        let mut state = self.state();
        if state.refused.contains(&pid) {
            return Err(esrch());
        }
        let alive = state.processes.get(&pid).is_some_and(|p| p.exit.is_none());
        if !alive {
            return Err(esrch());
        }
        state.signals.push((pid, signal));
        let namespace_init = state.processes.get(&pid).is_some_and(|p| p.namespace_init);
        let fatal = match signal {
            Signal::SIGKILL => true,
            Signal::SIGTERM | Signal::SIGINT => !namespace_init,
            _ => false,
        };
        if fatal {
            Self::terminate(&mut state, pid, ExitStatus::Signaled(signal));
            drop(state);
            self.exited.notify_all();
        }
        Ok(())
    }

    fn start_time(&self, pid: i32) -> Result<Option<u64>> {
        Ok(self
            .state()
            .processes
            .get(&pid)
            .filter(|p| p.exit.is_none())
            .map(|p| p.start_time))
    }

    fn freeze_state(&self, cgroup: &Path) -> Result<FreezeState> {
        Ok(self
            .state()
            .cgroups
            .get(cgroup)
            .map_or(FreezeState::Thawed, |c| c.freeze))
    }

    fn set_frozen(&self, cgroup: &Path, frozen: bool) -> Result<()> {
        let freeze = if frozen {
            FreezeState::Frozen
        } else {
            FreezeState::Thawed
        };
        self.set_freeze(cgroup, freeze);
        Ok(())
    }

    fn pids(&self, cgroup: &Path) -> Result<Vec<i32>> {
        Ok(self
            .state()
            .cgroups
            .get(cgroup)
            .map(|c| c.pids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn stats(&self, cgroup: &Path) -> Result<CgroupStats> {
        let state = self.state();
        let cgroup = state.cgroups.get(cgroup).ok_or_else(|| CorralError::NotFound {
            kind: "cgroup",
            id: cgroup.display().to_string(),
        })?;
        Ok(CgroupStats {
            pids_current: cgroup.pids.len() as u64,
            memory_max: cgroup.resources.memory_max,
            ..CgroupStats::default()
        })
    }

    fn validate_resources(&self, _cgroup: &Path, limits: &ResourceLimits) -> Result<()> {
        if limits.pids_max == Some(0) {
            return Err(CorralError::ConfigRejected {
                message: "pids_max must be positive".into(),
            });
        }
        Ok(())
    }

    fn apply_resources(&self, cgroup: &Path, limits: &ResourceLimits) -> Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_apply) {
            return Err(CorralError::os(
                "write memory.max",
                std::io::Error::from_raw_os_error(libc::EBUSY),
            ));
        }
        state.applied.push(limits.clone());
        if let Some(c) = state.cgroups.get_mut(cgroup) {
            c.resources = limits.clone();
        }
        Ok(())
    }

    fn destroy_cgroup(&self, cgroup: &Path) -> Result<()> {
        let mut state = self.state();
        if state.cgroups.get(cgroup).is_some_and(|c| !c.pids.is_empty()) {
            return Err(CorralError::os("rmdir", std::io::Error::from_raw_os_error(libc::EBUSY)));
        }
        let _ = state.cgroups.remove(cgroup);
        Ok(())
    }
}

/// A temporary state root wired to a [`FakePlatform`].
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub platform: Arc<FakePlatform>,
    pub store: Arc<FileStateStore>,
    pub runtime: RuntimeConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeConfig {
            root: dir.path().join("state"),
            cgroup_root: dir.path().join("cgroup"),
            handshake_timeout: Duration::from_secs(5),
        };
        Self {
            store: Arc::new(FileStateStore::new(&runtime.root)),
            platform: Arc::new(FakePlatform::default()),
            runtime,
            dir,
        }
    }

    pub fn id(name: &str) -> ContainerId {
        ContainerId::new(name).unwrap()
    }

    /// Configuration whose init is an ordinary process in the caller's pid
    /// namespace, so default-fatal signals end it.
    pub fn shared_pid_namespace() -> ContainerConfig {
        let mut config = ContainerConfig::default();
        config.namespaces.pid = false;
        config
    }

    /// Default cgroup of container `name`.
    pub fn cgroup(name: &str) -> PathBuf {
        ContainerConfig::default().cgroup_path_for(&Self::id(name))
    }

    pub fn container(&self, name: &str) -> Container {
        self.container_with(name, ContainerConfig::default())
    }

    pub fn container_with(&self, name: &str, config: ContainerConfig) -> Container {
        Container::new(
            Self::id(name),
            config,
            self.runtime.clone(),
            Arc::clone(&self.store) as _,
            Arc::clone(&self.platform) as _,
        )
    }

    pub fn load(&self, name: &str) -> Result<Container> {
        Container::load(
            Self::id(name),
            self.runtime.clone(),
            Arc::clone(&self.store) as _,
            Arc::clone(&self.platform) as _,
        )
    }
}
