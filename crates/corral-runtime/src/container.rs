//! The container lifecycle manager.
//!
//! A [`Container`] holds no authoritative state of its own. Every operation
//! reloads the durable record and re-derives the status from the live
//! system, so a container created by one runtime invocation can be observed,
//! signalled and destroyed by another.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use corral_common::config::{ContainerConfig, RuntimeConfig};
use corral_common::error::{CorralError, Result, SignalFailure};
use corral_common::types::{ContainerId, FreezeState, Status};
use nix::sys::signal::Signal;

use crate::backend::{Platform, SpawnRequest};
use crate::handshake::ExecFifo;
use crate::metrics::MetricsSnapshot;
use crate::process::{HandleKind, Process, ProcessHandle, Tracker};
use crate::state::{ContainerRecord, OciState, StateStore};

/// Lifecycle manager for one container.
pub struct Container {
    id: ContainerId,
    runtime: RuntimeConfig,
    store: Arc<dyn StateStore>,
    platform: Arc<dyn Platform>,
    /// Serializes mutating operations within this process and caches the
    /// configuration last written to the record.
    config: Mutex<ContainerConfig>,
    tracked: Tracker,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("root", &self.runtime.root)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Creates a manager for a container that has no record yet.
    ///
    /// Nothing is written until [`Container::run`] spawns the init process.
    #[must_use]
    pub fn new(
        id: ContainerId,
        config: ContainerConfig,
        runtime: RuntimeConfig,
        store: Arc<dyn StateStore>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            id,
            runtime,
            store,
            platform,
            config: Mutex::new(config),
            tracked: Tracker::default(),
        }
    }

    /// Opens a manager for an existing container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if no record exists for `id`.
    pub fn load(
        id: ContainerId,
        runtime: RuntimeConfig,
        store: Arc<dyn StateStore>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let record = store.load(&id)?.ok_or_else(|| not_found(&id))?;
        Ok(Self::new(id, record.config, runtime, store, platform))
    }

    /// Container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Derives the current status from the record and the live system.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container has no record.
    pub fn status(&self) -> Result<Status> {
        let record = self.record()?;
        self.status_of(&record)
    }

    /// Returns the durable record as stored.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container has no record.
    pub fn record(&self) -> Result<ContainerRecord> {
        self.store.load(&self.id)?.ok_or_else(|| not_found(&self.id))
    }

    /// Returns the OCI state document.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container has no record.
    pub fn oci_state(&self) -> Result<OciState> {
        let record = self.record()?;
        let status = self.status_of(&record)?;
        Ok(OciState::new(&record, status))
    }

    /// Returns the container configuration.
    ///
    /// Once the container exists this is the configuration in the durable
    /// record, which reflects updates made by other invocations.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub fn config(&self) -> Result<ContainerConfig> {
        match self.store.load(&self.id)? {
            Some(record) => Ok(record.config),
            None => Ok(self.lock().clone()),
        }
    }

    /// Pids spawned through this manager whose exit has not been collected.
    ///
    /// Handles that were dropped and pids that no longer exist are pruned.
    #[must_use]
    pub fn tracked_processes(&self) -> Vec<i32> {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.retain(|&pid| matches!(self.platform.start_time(pid), Ok(Some(_))));
        tracked.iter().copied().collect()
    }

    /// Spawns `process` without running the user command.
    ///
    /// For an init descriptor this creates the container: the cgroup and exec
    /// handshake are set up, the init is spawned into fresh namespaces and
    /// parked, and the record is written. The container is then `Created`.
    /// A non-init descriptor behaves as in [`Container::start`].
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidProcess`] if `process` was already
    /// spawned, [`CorralError::InvalidState`] if the container already
    /// exists, or the spawn failure.
    pub fn run(&self, process: &mut Process) -> Result<()> {
        if process.is_bound() {
            return Err(CorralError::InvalidProcess);
        }
        if !process.init {
            return self.join(process, "run");
        }

        let config = self.lock();
        if let Some(record) = self.store.load(&self.id)? {
            let status = self.status_of(&record)?;
            return Err(self.invalid_state(status, "create"));
        }
        validate_sub_cgroups(process)?;

        let state_dir = self.state_dir();
        std::fs::create_dir_all(&state_dir).map_err(|e| CorralError::Io {
            path: state_dir.clone(),
            source: e,
        })?;
        let handshake = ExecFifo::in_dir(&state_dir);
        handshake.remove()?;
        handshake.create()?;

        let cgroup = config.cgroup_path_for(&self.id);
        let spawned = crate::io::prepare(process).and_then(|(stdio, io)| {
            let request = SpawnRequest {
                id: &self.id,
                config: &config,
                cgroup: cgroup.clone(),
                process,
                stdio: &stdio,
                handshake: Some(handshake.path()),
            };
            match self.platform.spawn_init(request) {
                Ok(pid) => Ok((pid, io)),
                Err(e) => {
                    stdio.restore(process);
                    Err(e)
                }
            }
        });
        let (pid, io) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                self.discard_state(&handshake);
                return Err(e);
            }
        };

        let saved = self
            .platform
            .start_time(pid)
            .and_then(|start| {
                start.ok_or_else(|| CorralError::NotFound {
                    kind: "process",
                    id: pid.to_string(),
                })
            })
            .and_then(|start| {
                self.store.save(&ContainerRecord {
                    id: self.id.clone(),
                    init_process_pid: pid,
                    init_process_start: start,
                    created: Utc::now(),
                    config: config.clone(),
                })
            });
        if let Err(e) = saved {
            tracing::warn!(id = %self.id, pid, error = %e, "failed to record container, discarding init");
            let _ = self.platform.signal(pid, Signal::SIGKILL);
            let _ = self.platform.wait(pid);
            let _ = self.platform.destroy_cgroup(&cgroup);
            self.discard_state(&handshake);
            return Err(e);
        }

        let handle = ProcessHandle::new(
            pid,
            HandleKind::Init { handshake },
            Arc::clone(&self.platform),
            Arc::clone(&self.tracked),
        );
        process.bind(handle, io);
        tracing::info!(id = %self.id, pid, "container created");
        Ok(())
    }

    /// Spawns `process` and runs its command.
    ///
    /// An init descriptor is [`run`](Container::run) and then
    /// [`exec`](Container::exec)uted. Any other descriptor joins the
    /// namespaces and cgroup of the running container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidProcess`] if `process` was already
    /// spawned, [`CorralError::InvalidState`] if a non-init process targets
    /// a container that is not running, or the spawn failure.
    pub fn start(&self, process: &mut Process) -> Result<()> {
        if process.is_bound() {
            return Err(CorralError::InvalidProcess);
        }
        if process.init {
            self.run(process)?;
            return self.exec();
        }
        self.join(process, "start")
    }

    /// Releases the exec handshake so the parked init runs its command.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::AlreadyExecuted`] if the handshake was already
    /// released, [`CorralError::InvalidState`] if the container stopped,
    /// or [`CorralError::HandshakeTimeout`] if the init never reached the
    /// handshake.
    pub fn exec(&self) -> Result<()> {
        let _config = self.lock();
        let record = self.record()?;
        match self.status_of(&record)? {
            Status::Created => {}
            Status::Stopped => return Err(self.invalid_state(Status::Stopped, "exec")),
            Status::Running | Status::Pausing | Status::Paused => {
                return Err(CorralError::AlreadyExecuted {
                    id: self.id.to_string(),
                });
            }
        }
        self.handshake()
            .release(&self.id, self.runtime.handshake_timeout)?;
        tracing::info!(id = %self.id, pid = record.init_process_pid, "container started");
        Ok(())
    }

    /// Removes every trace of a stopped container.
    ///
    /// Destroying a container whose record is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// stopped, [`CorralError::Busy`] while its cgroup still has processes,
    /// or the failure of a removal step.
    pub fn destroy(&self) -> Result<()> {
        let _config = self.lock();
        let Some(record) = self.store.load(&self.id)? else {
            tracing::debug!(id = %self.id, "container already destroyed");
            return Ok(());
        };
        let status = self.status_of(&record)?;
        if status != Status::Stopped {
            return Err(self.invalid_state(status, "destroy"));
        }

        let cgroup = record.config.cgroup_path_for(&self.id);
        let pids = self.platform.pids(&cgroup)?;
        if !pids.is_empty() {
            return Err(CorralError::Busy {
                id: self.id.to_string(),
                pids,
            });
        }

        self.platform.destroy_cgroup(&cgroup)?;
        self.handshake().remove()?;
        self.store.remove(&self.id)?;
        let state_dir = self.state_dir();
        if let Err(e) = std::fs::remove_dir(&state_dir) {
            tracing::debug!(path = %state_dir.display(), error = %e, "state directory left in place");
        }
        tracing::info!(id = %self.id, "container destroyed");
        Ok(())
    }

    /// Sends `signal` to the init process, or with `all` to every process in
    /// the container cgroup.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] if the init is gone (`all =
    /// false`), [`CorralError::PartialSignal`] if any delivery failed
    /// (`all = true`), or the delivery error.
    pub fn signal(&self, signal: Signal, all: bool) -> Result<()> {
        let record = self.record()?;
        if !all {
            let status = self.status_of(&record)?;
            if status == Status::Stopped {
                return Err(self.invalid_state(status, "signal"));
            }
            self.platform.signal(record.init_process_pid, signal)?;
            tracing::info!(id = %self.id, pid = record.init_process_pid, %signal, "signalled init");
            return Ok(());
        }

        let pids = self.platform.pids(&record.config.cgroup_path_for(&self.id))?;
        let mut delivered = 0;
        let mut failures = Vec::new();
        for pid in pids {
            match self.platform.signal(pid, signal) {
                Ok(()) => delivered += 1,
                Err(e) => failures.push(SignalFailure {
                    pid,
                    source: into_io(e),
                }),
            }
        }
        tracing::info!(id = %self.id, %signal, delivered, failed = failures.len(), "signalled all processes");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CorralError::PartialSignal {
                delivered,
                failures,
            })
        }
    }

    /// Freezes every process in the container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// running.
    pub fn pause(&self) -> Result<()> {
        let _config = self.lock();
        let record = self.record()?;
        let status = self.status_of(&record)?;
        if status != Status::Running {
            return Err(self.invalid_state(status, "pause"));
        }
        self.platform
            .set_frozen(&record.config.cgroup_path_for(&self.id), true)?;
        tracing::info!(id = %self.id, "container paused");
        Ok(())
    }

    /// Thaws a paused container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is paused
    /// or pausing.
    pub fn resume(&self) -> Result<()> {
        let _config = self.lock();
        let record = self.record()?;
        let status = self.status_of(&record)?;
        if !matches!(status, Status::Paused | Status::Pausing) {
            return Err(self.invalid_state(status, "resume"));
        }
        self.platform
            .set_frozen(&record.config.cgroup_path_for(&self.id), false)?;
        tracing::info!(id = %self.id, "container resumed");
        Ok(())
    }

    /// Lists the pids in the container cgroup.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container has no record.
    pub fn processes(&self) -> Result<Vec<i32>> {
        let record = self.record()?;
        self.platform
            .pids(&record.config.cgroup_path_for(&self.id))
    }

    /// Reads a resource usage snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container has no record.
    pub fn stats(&self) -> Result<MetricsSnapshot> {
        let record = self.record()?;
        let stats = self
            .platform
            .stats(&record.config.cgroup_path_for(&self.id))?;
        Ok(MetricsSnapshot::from_cgroup(self.id.clone(), &stats))
    }

    /// Applies the resource limits of `config` to the live cgroup and
    /// records them.
    ///
    /// Only `resources` is taken from `config`. Namespaces, id mappings,
    /// rootfs, hostname, cgroup path, bundle and annotations are fixed when
    /// the container is created and keep their recorded values.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ConfigRejected`] if the limits are invalid or
    /// could not be applied; the previous limits are then still in force.
    /// Returns [`CorralError::InvalidState`] if the container is stopped.
    pub fn set(&self, config: ContainerConfig) -> Result<()> {
        let mut current = self.lock();
        let mut record = self.record()?;
        let status = self.status_of(&record)?;
        if status == Status::Stopped {
            return Err(self.invalid_state(status, "update"));
        }

        let resources = config.resources;
        let cgroup = record.config.cgroup_path_for(&self.id);
        self.platform.validate_resources(&cgroup, &resources)?;
        if let Err(e) = self.platform.apply_resources(&cgroup, &resources) {
            tracing::warn!(id = %self.id, error = %e, "resource update failed, restoring previous limits");
            if let Err(restore) = self
                .platform
                .apply_resources(&cgroup, &record.config.resources)
            {
                tracing::error!(id = %self.id, error = %restore, "failed to restore previous limits");
            }
            return Err(CorralError::ConfigRejected {
                message: e.to_string(),
            });
        }

        record.config.resources = resources;
        self.store.save(&record)?;
        *current = record.config;
        tracing::info!(id = %self.id, "container resources updated");
        Ok(())
    }

    fn join(&self, process: &mut Process, operation: &'static str) -> Result<()> {
        let record = self.record()?;
        let status = self.status_of(&record)?;
        if status != Status::Running {
            return Err(self.invalid_state(status, operation));
        }
        validate_sub_cgroups(process)?;

        let (stdio, io) = crate::io::prepare(process)?;
        let request = SpawnRequest {
            id: &self.id,
            config: &record.config,
            cgroup: record.config.cgroup_path_for(&self.id),
            process,
            stdio: &stdio,
            handshake: None,
        };
        let pid = match self.platform.spawn_exec(record.init_process_pid, request) {
            Ok(pid) => pid,
            Err(e) => {
                stdio.restore(process);
                return Err(e);
            }
        };

        let handle = ProcessHandle::new(
            pid,
            HandleKind::Exec,
            Arc::clone(&self.platform),
            Arc::clone(&self.tracked),
        );
        process.bind(handle, io);
        tracing::info!(id = %self.id, pid, "process joined container");
        Ok(())
    }

    fn status_of(&self, record: &ContainerRecord) -> Result<Status> {
        match self.platform.start_time(record.init_process_pid)? {
            Some(start) if start == record.init_process_start => {}
            Some(_) => {
                tracing::debug!(id = %self.id, pid = record.init_process_pid, "init pid was reused");
                return Ok(Status::Stopped);
            }
            None => return Ok(Status::Stopped),
        }
        if self.handshake().exists() {
            return Ok(Status::Created);
        }
        Ok(
            match self
                .platform
                .freeze_state(&record.config.cgroup_path_for(&self.id))?
            {
                FreezeState::Thawed => Status::Running,
                FreezeState::Freezing => Status::Pausing,
                FreezeState::Frozen => Status::Paused,
            },
        )
    }

    fn lock(&self) -> MutexGuard<'_, ContainerConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_dir(&self) -> PathBuf {
        self.runtime.container_dir(&self.id)
    }

    fn handshake(&self) -> ExecFifo {
        ExecFifo::in_dir(&self.state_dir())
    }

    /// Removes the handshake and state directory of a failed create.
    fn discard_state(&self, handshake: &ExecFifo) {
        let _ = handshake.remove();
        let _ = std::fs::remove_dir(self.state_dir());
    }

    fn invalid_state(&self, status: Status, operation: &'static str) -> CorralError {
        CorralError::InvalidState {
            id: self.id.to_string(),
            status: status.to_string(),
            operation,
        }
    }
}

/// Builds the Linux state store and platform described by `runtime`.
#[cfg(target_os = "linux")]
#[must_use]
pub fn linux_backends(runtime: &RuntimeConfig) -> (Arc<dyn StateStore>, Arc<dyn Platform>) {
    (
        Arc::new(crate::state::FileStateStore::new(&runtime.root)),
        Arc::new(crate::backend::linux::LinuxPlatform::new(&runtime.cgroup_root)),
    )
}

fn not_found(id: &ContainerId) -> CorralError {
    CorralError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

/// Only the unified hierarchy key is meaningful, and the path must stay
/// below the container cgroup.
fn validate_sub_cgroups(process: &Process) -> Result<()> {
    for (controller, path) in &process.sub_cgroup_paths {
        if !controller.is_empty() {
            return Err(CorralError::Config {
                message: format!(
                    "sub-cgroup for controller {controller:?} is not supported on cgroup v2"
                ),
            });
        }
        let escapes = std::path::Path::new(path)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes {
            return Err(CorralError::Config {
                message: format!("sub-cgroup path {path:?} must be relative"),
            });
        }
    }
    Ok(())
}

fn into_io(err: CorralError) -> std::io::Error {
    match err {
        CorralError::Os { source, .. } | CorralError::Io { source, .. } => source,
        other => std::io::Error::other(other),
    }
}
