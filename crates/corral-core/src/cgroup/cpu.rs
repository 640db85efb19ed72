//! CPU resource control via cgroups v2.
//!
//! Manages `cpu.max`, `cpu.weight`, and reads `cpu.stat`.

use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::{read_optional, write_file};

/// Counters from `cpu.stat`, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    /// Total CPU time.
    pub usage_usec: u64,
    /// User-mode CPU time.
    pub user_usec: u64,
    /// Kernel-mode CPU time.
    pub system_usec: u64,
}

/// Sets the CPU weight (shares) for a cgroup.
///
/// Weight is a value between 1 and 10000 that controls the relative
/// share of CPU time this cgroup receives under contention.
///
/// # Errors
///
/// Returns an error if writing to `cpu.weight` fails.
pub fn set_cpu_weight(cgroup_path: &Path, weight: u64) -> Result<()> {
    write_file(&cgroup_path.join("cpu.weight"), &weight.to_string())?;
    tracing::debug!(weight, "CPU weight set");
    Ok(())
}

/// Sets the CPU bandwidth limit (max microseconds per period).
///
/// Writes `quota_us period_us` to `cpu.max`, where `quota_us` is the
/// maximum CPU time allowed per `period_us` window.
///
/// # Errors
///
/// Returns an error if writing to `cpu.max` fails.
pub fn set_cpu_max(cgroup_path: &Path, quota_us: u64, period_us: u64) -> Result<()> {
    write_file(&cgroup_path.join("cpu.max"), &format!("{quota_us} {period_us}"))?;
    tracing::debug!(quota_us, period_us, "CPU max quota set");
    Ok(())
}

/// Reads `cpu.stat`. A missing file reads as zero usage.
///
/// # Errors
///
/// Returns an error if the file exists but a counter cannot be parsed.
pub fn read_cpu_stat(cgroup_path: &Path) -> Result<CpuStat> {
    let path = cgroup_path.join("cpu.stat");
    let Some(content) = read_optional(&path)? else {
        return Ok(CpuStat::default());
    };
    let mut stat = CpuStat::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let slot = match key {
            "usage_usec" => &mut stat.usage_usec,
            "user_usec" => &mut stat.user_usec,
            "system_usec" => &mut stat.system_usec,
            _ => continue,
        };
        *slot = value.trim().parse().map_err(|e| CorralError::Io {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
    }
    Ok(stat)
}
