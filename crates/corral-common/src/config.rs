//! Configuration models: runtime-wide settings and the per-container
//! configuration carried inside the durable record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ContainerId, IdMapping, NamespaceConfig, ResourceLimits};

/// Root configuration for the Corral runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one state directory per container.
    pub root: PathBuf,
    /// Mount point of the cgroup v2 unified hierarchy.
    pub cgroup_root: PathBuf,
    /// Upper bound on waiting for the init process to open the exec
    /// handshake.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
}

impl RuntimeConfig {
    /// Creates a configuration rooted at `root` with default settings.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Returns the state directory for a container.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: crate::constants::state_root().clone(),
            cgroup_root: PathBuf::from(crate::constants::CGROUP_V2_PATH),
            handshake_timeout: Duration::from_millis(crate::constants::DEFAULT_HANDSHAKE_TIMEOUT_MS),
        }
    }
}

/// Configuration of a single container.
///
/// The lifecycle manager stores and returns this value without
/// interpreting it; only the platform backend reads its fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Namespaces created for the init process.
    pub namespaces: NamespaceConfig,
    /// UID mappings for a user namespace.
    pub uid_mappings: Vec<IdMapping>,
    /// GID mappings for a user namespace.
    pub gid_mappings: Vec<IdMapping>,
    /// Root filesystem the init process is confined to.
    pub rootfs: Option<PathBuf>,
    /// Hostname set inside a new UTS namespace.
    pub hostname: Option<String>,
    /// Cgroup path relative to the cgroup v2 mount point.
    pub cgroup_path: Option<PathBuf>,
    /// Resource limits applied to the container cgroup.
    pub resources: ResourceLimits,
    /// Bundle directory the container was created from.
    pub bundle: PathBuf,
    /// Free-form annotations reported in the OCI state document.
    pub annotations: BTreeMap<String, String>,
}

impl ContainerConfig {
    /// Returns the cgroup path relative to the hierarchy root, defaulting to
    /// `corral/<id>`.
    #[must_use]
    pub fn cgroup_path_for(&self, id: &ContainerId) -> PathBuf {
        self.cgroup_path.clone().unwrap_or_else(|| {
            Path::new(crate::constants::APP_NAME).join(id.as_str())
        })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
