//! Domain primitive types used across the Corral workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};

/// Unique identifier for a container instance.
///
/// IDs become directory names under the state root, so they are restricted
/// to `[A-Za-z0-9][A-Za-z0-9_.-]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Validates and wraps a container ID.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if the ID is empty, too long, or
    /// contains characters outside the allowed set.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_first = id
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let valid_rest = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid_first || !valid_rest || id.len() > crate::constants::MAX_ID_LENGTH {
            return Err(CorralError::Config {
                message: format!("invalid container id {id:?}"),
            });
        }
        Ok(Self(id))
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContainerId {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a container.
///
/// Status is derived on every query from the durable record and live OS
/// state; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Namespaces exist and the init process is parked at the exec handshake.
    Created,
    /// The user's command is executing.
    Running,
    /// A freeze was requested but not every task is frozen yet.
    Pausing,
    /// Every process in the container is frozen.
    Paused,
    /// The init process is gone. Terminal.
    Stopped,
}

impl Status {
    /// Returns the OCI string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Freeze state reported by the cgroup freezer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    /// Tasks are running normally.
    Thawed,
    /// A freeze was requested and is still in progress.
    Freezing,
    /// All tasks are frozen.
    Frozen,
}

/// Resource limits for a container cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU weight (1-10000).
    pub cpu_weight: Option<u64>,
    /// CPU bandwidth as `(quota_us, period_us)`.
    pub cpu_max: Option<(u64, u64)>,
    /// Hard memory limit in bytes.
    pub memory_max: Option<u64>,
    /// Memory throttling threshold in bytes.
    pub memory_high: Option<u64>,
    /// I/O weight (1-10000).
    pub io_weight: Option<u16>,
    /// Maximum number of tasks.
    pub pids_max: Option<u64>,
}

impl ResourceLimits {
    /// Returns `true` if no limit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which namespaces to create for the init process.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate user namespace.
    pub user: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate cgroup namespace.
    pub cgroup: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            user: false,
            ipc: true,
            uts: true,
            cgroup: false,
        }
    }
}

/// One line of a user-namespace uid or gid map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// First ID inside the namespace.
    pub container_id: u32,
    /// First ID on the host.
    pub host_id: u32,
    /// Number of IDs mapped.
    pub size: u32,
}

/// Numeric identity a process runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub uid: u32,
    /// Primary group ID.
    pub gid: u32,
}

impl FromStr for User {
    type Err = CorralError;

    /// Parses `uid` or `uid:gid`. A missing gid defaults to the uid.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CorralError::Config {
            message: format!("invalid user {s:?}, expected uid[:gid]"),
        };
        let (uid, gid) = match s.split_once(':') {
            Some((uid, gid)) => (uid, Some(gid)),
            None => (s, None),
        };
        let uid: u32 = uid.parse().map_err(|_| invalid())?;
        let gid: u32 = match gid {
            Some(gid) => gid.parse().map_err(|_| invalid())?,
            None => uid,
        };
        Ok(Self { uid, gid })
    }
}

/// Initial console geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

/// Whether a process may gain privileges through `execve`.
///
/// `Unset` leaves the inherited setting alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoNewPrivileges {
    /// Inherit whatever the runtime process has.
    #[default]
    Unset,
    /// Explicitly leave privilege escalation possible.
    Disabled,
    /// Set `PR_SET_NO_NEW_PRIVS`.
    Enabled,
}

impl FromStr for NoNewPrivileges {
    type Err = CorralError;

    /// Parses `auto`/empty as `Unset`, otherwise a boolean.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Unset),
            "true" | "1" => Ok(Self::Enabled),
            "false" | "0" => Ok(Self::Disabled),
            other => Err(CorralError::Config {
                message: format!("invalid no-new-privileges value {other:?}"),
            }),
        }
    }
}

/// Resource kinds accepted by `setrlimit(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RlimitResource {
    /// `RLIMIT_AS`
    RlimitAs,
    /// `RLIMIT_CORE`
    RlimitCore,
    /// `RLIMIT_CPU`
    RlimitCpu,
    /// `RLIMIT_DATA`
    RlimitData,
    /// `RLIMIT_FSIZE`
    RlimitFsize,
    /// `RLIMIT_MEMLOCK`
    RlimitMemlock,
    /// `RLIMIT_NOFILE`
    RlimitNofile,
    /// `RLIMIT_NPROC`
    RlimitNproc,
    /// `RLIMIT_STACK`
    RlimitStack,
}

/// A soft/hard resource limit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    /// Which resource to limit.
    #[serde(rename = "type")]
    pub resource: RlimitResource,
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}
