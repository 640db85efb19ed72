//! Task-count control via cgroups v2.

use std::path::Path;

use corral_common::error::Result;

use super::{parse_limit, read_optional, write_file};

/// Caps the number of tasks in a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `pids.max` fails.
pub fn set_pids_max(cgroup_path: &Path, max: u64) -> Result<()> {
    write_file(&cgroup_path.join("pids.max"), &max.to_string())?;
    tracing::debug!(max, "pids max set");
    Ok(())
}

/// Reads the number of tasks; zero if the controller is not enabled.
///
/// # Errors
///
/// Returns an error if `pids.current` exists but cannot be parsed.
pub fn read_pids_current(cgroup_path: &Path) -> Result<u64> {
    let path = cgroup_path.join("pids.current");
    match read_optional(&path)? {
        Some(raw) => Ok(parse_limit(&path, &raw)?.unwrap_or(0)),
        None => Ok(0),
    }
}
