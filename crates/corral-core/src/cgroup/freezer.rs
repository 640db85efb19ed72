//! The cgroup v2 freezer.
//!
//! `cgroup.freeze` holds the requested state; the `frozen` key of
//! `cgroup.events` reports whether the kernel has finished freezing every
//! task. The gap between the two is the `Pausing` window.

use std::path::Path;

use corral_common::types::FreezeState;
use corral_common::error::Result;

use super::{read_optional, write_file};

/// Reads the freezer state. A cgroup without freezer files (the root, or one
/// that was removed) reads as thawed.
///
/// # Errors
///
/// Returns an error if a present freezer file cannot be read.
pub fn freeze_state(cgroup_path: &Path) -> Result<FreezeState> {
    let Some(requested) = read_optional(&cgroup_path.join("cgroup.freeze"))? else {
        return Ok(FreezeState::Thawed);
    };
    if requested.trim() != "1" {
        return Ok(FreezeState::Thawed);
    }
    let events = read_optional(&cgroup_path.join("cgroup.events"))?.unwrap_or_default();
    let frozen = events
        .lines()
        .any(|line| line.split_whitespace().eq(["frozen", "1"]));
    Ok(if frozen {
        FreezeState::Frozen
    } else {
        FreezeState::Freezing
    })
}

/// Requests a freeze or thaw. Does not wait for the kernel to finish.
///
/// # Errors
///
/// Returns an error if writing `cgroup.freeze` fails.
pub fn set_frozen(cgroup_path: &Path, frozen: bool) -> Result<()> {
    write_file(&cgroup_path.join("cgroup.freeze"), if frozen { "1" } else { "0" })?;
    tracing::debug!(frozen, path = %cgroup_path.display(), "freezer updated");
    Ok(())
}
