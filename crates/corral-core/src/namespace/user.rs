//! User namespace ID mappings.
//!
//! Maps container UIDs/GIDs to host IDs. The maps of a child that was cloned
//! into a new user namespace are written by the parent while the child is
//! still parked at the exec handshake.

use corral_common::error::{CorralError, Result};
use corral_common::types::IdMapping;

/// Renders mappings in the `/proc/<pid>/uid_map` line format.
#[must_use]
pub fn format_mappings(mappings: &[IdMapping]) -> String {
    mappings
        .iter()
        .map(|m| format!("{} {} {}\n", m.container_id, m.host_id, m.size))
        .collect()
}

/// Writes the UID and GID maps of `pid`'s user namespace.
///
/// An unprivileged runtime must deny `setgroups` before the kernel accepts
/// its GID map; a root runtime keeps `setgroups` so the container can set
/// supplementary groups.
///
/// # Errors
///
/// Returns an error if writing to `/proc/<pid>/setgroups`,
/// `/proc/<pid>/uid_map`, or `/proc/<pid>/gid_map` fails.
pub fn write_id_mappings(pid: i32, uid_mappings: &[IdMapping], gid_mappings: &[IdMapping]) -> Result<()> {
    let write = |file: &str, content: &str| {
        let path = format!("/proc/{pid}/{file}");
        std::fs::write(&path, content).map_err(|e| CorralError::Io {
            path: path.into(),
            source: e,
        })
    };

    if !uid_mappings.is_empty() {
        write("uid_map", &format_mappings(uid_mappings))?;
    }
    if !gid_mappings.is_empty() {
        let setgroups = format!("/proc/{pid}/setgroups");
        if !nix::unistd::geteuid().is_root() && std::path::Path::new(&setgroups).exists() {
            write("setgroups", "deny")?;
        }
        write("gid_map", &format_mappings(gid_mappings))?;
    }

    tracing::debug!(pid, uids = uid_mappings.len(), gids = gid_mappings.len(), "wrote ID maps");
    Ok(())
}
