//! Cgroups v2 resource management.
//!
//! Provides a handle on one container's cgroup inside the unified hierarchy:
//! creation, limit validation and application, process enumeration, the
//! freezer, usage statistics, and teardown.

pub mod cpu;
pub mod freezer;
pub mod io;
pub mod memory;
pub mod pids;

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::{FreezeState, ResourceLimits};
use serde::{Deserialize, Serialize};

/// Controllers the runtime delegates to container cgroups.
const CONTROLLERS: [&str; 4] = ["cpu", "memory", "io", "pids"];

const UNLIMITED: &str = "max";
const DEFAULT_WEIGHT: &str = "100";
const DEFAULT_IO_WEIGHT: &str = "default 100";
const DEFAULT_CPU_MAX: &str = "max 100000";

/// Resource usage counters read from a cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupStats {
    /// Total CPU time in microseconds.
    pub cpu_usage_usec: u64,
    /// User-mode CPU time in microseconds.
    pub cpu_user_usec: u64,
    /// Kernel-mode CPU time in microseconds.
    pub cpu_system_usec: u64,
    /// Current memory usage in bytes.
    pub memory_current: u64,
    /// Memory limit in bytes, `None` when unlimited.
    pub memory_max: Option<u64>,
    /// Number of tasks in the cgroup.
    pub pids_current: u64,
    /// Bytes read from block devices.
    pub io_read_bytes: u64,
    /// Bytes written to block devices.
    pub io_write_bytes: u64,
}

/// Handle to a cgroup for a specific container.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    /// Path to this container's cgroup directory.
    path: PathBuf,
}

impl CgroupManager {
    /// Returns a handle for `relative` under the hierarchy mounted at `root`
    /// without touching the filesystem.
    #[must_use]
    pub fn new(root: &Path, relative: &Path) -> Self {
        let relative = relative.strip_prefix("/").unwrap_or(relative);
        Self {
            path: root.join(relative),
        }
    }

    /// Creates the cgroup directory, delegating controllers from each
    /// ancestor on the way down.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup directory cannot be created.
    pub fn create(root: &Path, relative: &Path) -> Result<Self> {
        let cgroup = Self::new(root, relative);
        std::fs::create_dir_all(&cgroup.path).map_err(|e| CorralError::Io {
            path: cgroup.path.clone(),
            source: e,
        })?;
        cgroup.enable_controllers(root);
        tracing::info!(path = %cgroup.path.display(), "cgroup created");
        Ok(cgroup)
    }

    /// Returns the absolute path of the cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the cgroup directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Returns the handle of a nested cgroup.
    #[must_use]
    pub fn child(&self, relative: &str) -> Self {
        Self::new(&self.path, Path::new(relative))
    }

    fn enable_controllers(&self, root: &Path) {
        let Ok(relative) = self.path.strip_prefix(root) else {
            return;
        };
        let request = CONTROLLERS
            .iter()
            .map(|c| format!("+{c}"))
            .collect::<Vec<_>>()
            .join(" ");
        let mut current = root.to_path_buf();
        for component in relative.components() {
            let control = current.join("cgroup.subtree_control");
            if let Err(e) = std::fs::write(&control, &request) {
                tracing::debug!(path = %control.display(), error = %e, "controller delegation skipped");
            }
            current.push(component);
        }
    }

    /// Checks `limits` against value ranges and the live cgroup without
    /// writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ConfigRejected`] describing the first problem
    /// found.
    pub fn validate_limits(&self, limits: &ResourceLimits) -> Result<()> {
        check_ranges(limits)?;
        if limits.is_empty() {
            return Ok(());
        }

        let available = self.controllers().map_err(|_| CorralError::ConfigRejected {
            message: format!("cgroup {} does not exist", self.path.display()),
        })?;
        let required = [
            ("cpu", limits.cpu_weight.is_some() || limits.cpu_max.is_some()),
            ("memory", limits.memory_max.is_some() || limits.memory_high.is_some()),
            ("io", limits.io_weight.is_some()),
            ("pids", limits.pids_max.is_some()),
        ];
        for (controller, needed) in required {
            if needed && !available.iter().any(|c| c == controller) {
                return Err(CorralError::ConfigRejected {
                    message: format!("{controller} controller is not enabled for this cgroup"),
                });
            }
        }

        if let Some(max) = limits.memory_max {
            let current = memory::read_memory_current(&self.path)?;
            if max < current {
                return Err(CorralError::ConfigRejected {
                    message: format!("memory limit {max} is below current usage {current}"),
                });
            }
        }
        Ok(())
    }

    /// Applies resource limits to this cgroup.
    ///
    /// Every limit is written: a `None` field resets its control file to the
    /// kernel default, so applying a previous set of limits fully restores
    /// it. Control files of controllers that are not enabled are skipped for
    /// `None` fields.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to cgroup control files fails.
    pub fn apply_limits(&self, limits: &ResourceLimits) -> Result<()> {
        match limits.cpu_weight {
            Some(weight) => cpu::set_cpu_weight(&self.path, weight)?,
            None => self.reset("cpu.weight", DEFAULT_WEIGHT)?,
        }
        match limits.cpu_max {
            Some((quota_us, period_us)) => cpu::set_cpu_max(&self.path, quota_us, period_us)?,
            None => self.reset("cpu.max", DEFAULT_CPU_MAX)?,
        }
        match limits.memory_max {
            Some(bytes) => memory::set_memory_max(&self.path, bytes)?,
            None => self.reset("memory.max", UNLIMITED)?,
        }
        match limits.memory_high {
            Some(bytes) => memory::set_memory_high(&self.path, bytes)?,
            None => self.reset("memory.high", UNLIMITED)?,
        }
        match limits.io_weight {
            Some(weight) => io::set_io_weight(&self.path, weight)?,
            None => self.reset("io.weight", DEFAULT_IO_WEIGHT)?,
        }
        match limits.pids_max {
            Some(max) => pids::set_pids_max(&self.path, max)?,
            None => self.reset("pids.max", UNLIMITED)?,
        }
        Ok(())
    }

    /// Writes the default value of a control file that exists.
    fn reset(&self, file: &str, default: &str) -> Result<()> {
        let path = self.path.join(file);
        if !path.exists() {
            return Ok(());
        }
        write_file(&path, default)?;
        tracing::debug!(file, default, "limit reset to default");
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        write_file(&self.path.join("cgroup.procs"), &pid.to_string())?;
        tracing::debug!(pid, path = %self.path.display(), "added process to cgroup");
        Ok(())
    }

    /// Lists every pid in this cgroup and its descendants.
    ///
    /// Returns an empty list if the cgroup no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a `cgroup.procs` file cannot be read or parsed.
    pub fn pids(&self) -> Result<Vec<i32>> {
        let mut pids = Vec::new();
        collect_pids(&self.path, &mut pids)?;
        Ok(pids)
    }

    /// Reads the freezer state.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer files exist but cannot be read.
    pub fn freeze_state(&self) -> Result<FreezeState> {
        freezer::freeze_state(&self.path)
    }

    /// Requests a freeze (`true`) or thaw (`false`).
    ///
    /// # Errors
    ///
    /// Returns an error if writing `cgroup.freeze` fails.
    pub fn set_frozen(&self, frozen: bool) -> Result<()> {
        freezer::set_frozen(&self.path, frozen)
    }

    /// Collects usage counters. Counters of controllers that are not
    /// enabled read as zero.
    ///
    /// # Errors
    ///
    /// Returns an error if a present stat file cannot be parsed.
    pub fn stats(&self) -> Result<CgroupStats> {
        let cpu = cpu::read_cpu_stat(&self.path)?;
        let (io_read_bytes, io_write_bytes) = io::read_io_bytes(&self.path)?;
        Ok(CgroupStats {
            cpu_usage_usec: cpu.usage_usec,
            cpu_user_usec: cpu.user_usec,
            cpu_system_usec: cpu.system_usec,
            memory_current: memory::read_memory_current(&self.path)?,
            memory_max: memory::read_memory_max(&self.path)?,
            pids_current: pids::read_pids_current(&self.path)?,
            io_read_bytes,
            io_write_bytes,
        })
    }

    /// Removes the cgroup and every nested cgroup.
    ///
    /// Succeeds if the cgroup is already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if a cgroup directory cannot be removed, for example
    /// because it still holds processes.
    pub fn destroy(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        remove_tree(&self.path)?;
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }

    fn controllers(&self) -> Result<Vec<String>> {
        let path = self.path.join("cgroup.controllers");
        let content = std::fs::read_to_string(&path).map_err(|e| CorralError::Io { path, source: e })?;
        Ok(content.split_whitespace().map(str::to_owned).collect())
    }
}

fn check_ranges(limits: &ResourceLimits) -> Result<()> {
    let reject = |message: String| Err(CorralError::ConfigRejected { message });
    if let Some(weight) = limits.cpu_weight.filter(|w| !(1..=10_000).contains(w)) {
        return reject(format!("cpu weight {weight} outside 1..=10000"));
    }
    if let Some(weight) = limits.io_weight.filter(|w| !(1..=10_000).contains(w)) {
        return reject(format!("io weight {weight} outside 1..=10000"));
    }
    if let Some((quota_us, period_us)) = limits.cpu_max {
        if quota_us == 0 {
            return reject("cpu quota must be positive".into());
        }
        if !(1_000..=1_000_000).contains(&period_us) {
            return reject(format!("cpu period {period_us} outside 1000..=1000000"));
        }
    }
    if let (Some(high), Some(max)) = (limits.memory_high, limits.memory_max) {
        if high > max {
            return reject(format!("memory high {high} exceeds memory max {max}"));
        }
    }
    if limits.pids_max == Some(0) {
        return reject("pids limit must be positive".into());
    }
    Ok(())
}

fn collect_pids(dir: &Path, pids: &mut Vec<i32>) -> Result<()> {
    let procs = dir.join("cgroup.procs");
    match std::fs::read_to_string(&procs) {
        Ok(content) => {
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let pid = line.parse::<i32>().map_err(|e| CorralError::Io {
                    path: procs.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                })?;
                pids.push(pid);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CorralError::Io { path: procs, source: e }),
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CorralError::Io { path: dir.to_path_buf(), source: e }),
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            collect_pids(&entry.path(), pids)?;
        }
    }
    Ok(())
}

/// cgroupfs only allows `rmdir`; control files vanish with their directory.
fn remove_tree(dir: &Path) -> Result<()> {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                remove_tree(&entry.path())?;
            }
        }
    }
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::Io {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes a cgroup control file.
pub(crate) fn write_file(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Reads a cgroup control file, returning `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses a single unsigned counter, treating `max` as `None`.
pub(crate) fn parse_limit(path: &Path, raw: &str) -> Result<Option<u64>> {
    let raw = raw.trim();
    if raw == "max" {
        return Ok(None);
    }
    raw.parse::<u64>().map(Some).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}
