//! Memory resource control via cgroups v2.
//!
//! Manages `memory.max`, `memory.high`, and reads `memory.current`.

use std::path::Path;

use corral_common::error::Result;

use super::{parse_limit, read_optional, write_file};

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    write_file(&cgroup_path.join("memory.max"), &bytes.to_string())?;
    tracing::debug!(bytes, "memory max limit set");
    Ok(())
}

/// Sets the memory high watermark (throttling threshold).
///
/// # Errors
///
/// Returns an error if writing to `memory.high` fails.
pub fn set_memory_high(cgroup_path: &Path, bytes: u64) -> Result<()> {
    write_file(&cgroup_path.join("memory.high"), &bytes.to_string())?;
    tracing::debug!(bytes, "memory high watermark set");
    Ok(())
}

/// Reads current memory usage; zero if the controller is not enabled.
///
/// # Errors
///
/// Returns an error if `memory.current` exists but cannot be parsed.
pub fn read_memory_current(cgroup_path: &Path) -> Result<u64> {
    let path = cgroup_path.join("memory.current");
    match read_optional(&path)? {
        Some(raw) => Ok(parse_limit(&path, &raw)?.unwrap_or(u64::MAX)),
        None => Ok(0),
    }
}

/// Reads the hard limit; `None` when unlimited or not enabled.
///
/// # Errors
///
/// Returns an error if `memory.max` exists but cannot be parsed.
pub fn read_memory_max(cgroup_path: &Path) -> Result<Option<u64>> {
    let path = cgroup_path.join("memory.max");
    match read_optional(&path)? {
        Some(raw) => parse_limit(&path, &raw),
        None => Ok(None),
    }
}
