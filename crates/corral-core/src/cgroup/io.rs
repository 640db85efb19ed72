//! I/O resource control via cgroups v2.
//!
//! Manages `io.weight` and reads per-device byte counters from `io.stat`.

use std::path::Path;

use corral_common::error::Result;

use super::{read_optional, write_file};

/// Sets the default I/O weight for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `io.weight` fails.
pub fn set_io_weight(cgroup_path: &Path, weight: u16) -> Result<()> {
    write_file(&cgroup_path.join("io.weight"), &format!("default {weight}"))?;
    tracing::debug!(weight, "I/O weight set");
    Ok(())
}

/// Sums `rbytes` and `wbytes` across all devices in `io.stat`.
///
/// # Errors
///
/// Returns an error if `io.stat` exists but cannot be read.
pub fn read_io_bytes(cgroup_path: &Path) -> Result<(u64, u64)> {
    let Some(content) = read_optional(&cgroup_path.join("io.stat"))? else {
        return Ok((0, 0));
    };
    let mut read = 0u64;
    let mut written = 0u64;
    for field in content.split_whitespace() {
        if let Some(v) = field.strip_prefix("rbytes=") {
            read = read.saturating_add(v.parse().unwrap_or(0));
        } else if let Some(v) = field.strip_prefix("wbytes=") {
            written = written.saturating_add(v.parse().unwrap_or(0));
        }
    }
    Ok((read, written))
}
