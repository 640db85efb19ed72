//! Linux namespace management for container isolation.
//!
//! Maps the container's [`NamespaceConfig`] onto `clone(2)` flags for a new
//! init process, and opens `/proc/<pid>/ns/*` handles so later processes can
//! `setns(2)` into the same namespaces.

pub mod user;

use std::os::fd::{AsFd, OwnedFd};

use corral_common::error::{CorralError, Result};
use corral_common::types::NamespaceConfig;
use nix::sched::CloneFlags;

/// A namespace type the runtime knows how to create and join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// User and group ID mappings.
    User,
    /// Process ID space.
    Pid,
    /// Mount table.
    Mount,
    /// Network stack.
    Network,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Cgroup root view.
    Cgroup,
}

impl NamespaceKind {
    /// Join order: user first so the caller gains privileges inside it,
    /// mount last so `/proc` of the target stays reachable until then.
    pub const JOIN_ORDER: [Self; 7] = [
        Self::User,
        Self::Pid,
        Self::Ipc,
        Self::Uts,
        Self::Network,
        Self::Cgroup,
        Self::Mount,
    ];

    /// Returns the `clone(2)` / `setns(2)` flag for this kind.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }

    /// Returns the file name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Pid => "pid",
            Self::Mount => "mnt",
            Self::Network => "net",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Cgroup => "cgroup",
        }
    }

    fn enabled_in(self, config: &NamespaceConfig) -> bool {
        match self {
            Self::User => config.user,
            Self::Pid => config.pid,
            Self::Mount => config.mount,
            Self::Network => config.network,
            Self::Ipc => config.ipc,
            Self::Uts => config.uts,
            Self::Cgroup => config.cgroup,
        }
    }
}

/// Returns the kinds enabled in `config`, in join order.
#[must_use]
pub fn enabled_kinds(config: &NamespaceConfig) -> Vec<NamespaceKind> {
    NamespaceKind::JOIN_ORDER
        .into_iter()
        .filter(|kind| kind.enabled_in(config))
        .collect()
}

/// Combines the flags of every enabled namespace.
#[must_use]
pub fn clone_flags(config: &NamespaceConfig) -> CloneFlags {
    enabled_kinds(config)
        .into_iter()
        .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
}

/// An open handle on another process's namespace.
#[derive(Debug)]
pub struct NamespaceHandle {
    /// Namespace type.
    pub kind: NamespaceKind,
    /// Open `/proc/<pid>/ns/<kind>` file.
    pub fd: OwnedFd,
}

/// Opens handles on every enabled namespace of `pid`.
///
/// # Errors
///
/// Returns an error if a namespace file cannot be opened, typically because
/// the process exited.
pub fn open_namespaces(pid: i32, config: &NamespaceConfig) -> Result<Vec<NamespaceHandle>> {
    enabled_kinds(config)
        .into_iter()
        .map(|kind| {
            let path = format!("/proc/{pid}/ns/{}", kind.proc_name());
            let file = std::fs::File::open(&path).map_err(|e| CorralError::Io {
                path: path.into(),
                source: e,
            })?;
            Ok(NamespaceHandle {
                kind,
                fd: file.into(),
            })
        })
        .collect()
}

/// Moves the calling thread into the namespace behind `handle`.
///
/// # Errors
///
/// Returns an error if `setns(2)` fails.
pub fn join(handle: &NamespaceHandle) -> Result<()> {
    nix::sched::setns(handle.fd.as_fd(), handle.kind.clone_flag())
        .map_err(|e| CorralError::os("setns", e))
}
