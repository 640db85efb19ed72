//! Durable container records.
//!
//! One record per container, keyed by ID, holding just enough to find the
//! init process again: its pid and the kernel start time recorded when it
//! was spawned. Records are written atomically so a crashed runtime never
//! leaves a truncated file behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use corral_common::config::ContainerConfig;
use corral_common::constants::{OCI_VERSION, STATE_FILENAME};
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, Status};
use serde::{Deserialize, Serialize};

/// Persistent record of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container identifier.
    pub id: ContainerId,
    /// Host pid of the init process.
    pub init_process_pid: i32,
    /// Kernel start time of the init process, in clock ticks since boot.
    pub init_process_start: u64,
    /// When the container was created.
    pub created: DateTime<Utc>,
    /// Configuration the container was created with.
    pub config: ContainerConfig,
}

/// Storage for container records.
pub trait StateStore: Send + Sync {
    /// Loads the record for `id`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a record exists but cannot be read.
    fn load(&self, id: &ContainerId) -> Result<Option<ContainerRecord>>;

    /// Creates or replaces the record for `record.id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, record: &ContainerRecord) -> Result<()>;

    /// Deletes the record for `id`. Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Lists the IDs of every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list(&self) -> Result<Vec<ContainerId>>;
}

/// Stores each record as `<root>/<id>/state.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str()).join(STATE_FILENAME)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
        let path = self.record_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CorralError::Io { path, source: e }),
        };
        tracing::debug!(path = %path.display(), "loaded container record");
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, record: &ContainerRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let json = serde_json::to_vec_pretty(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
        tmp.write_all(&json).map_err(|e| io_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
        let _ = tmp.persist(&path).map_err(|e| io_error(&path, e.error))?;

        tracing::debug!(path = %path.display(), "saved container record");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed container record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }

    fn list(&self) -> Result<Vec<ContainerId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !entry.path().join(STATE_FILENAME).is_file() {
                continue;
            }
            if let Ok(id) = ContainerId::new(name) {
                ids.push(id);
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CorralError {
    CorralError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The OCI runtime state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciState {
    /// OCI specification version.
    pub oci_version: String,
    /// Container identifier.
    pub id: ContainerId,
    /// Derived lifecycle status.
    pub status: Status,
    /// Init pid; omitted once the container has stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Container annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl OciState {
    /// Builds the state document for `record` observed in `status`.
    #[must_use]
    pub fn new(record: &ContainerRecord, status: Status) -> Self {
        Self {
            oci_version: OCI_VERSION.to_string(),
            id: record.id.clone(),
            status,
            pid: (status != Status::Stopped).then_some(record.init_process_pid),
            bundle: record.config.bundle.clone(),
            annotations: record.config.annotations.clone(),
        }
    }
}
