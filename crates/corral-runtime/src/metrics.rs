//! Resource usage snapshots.
//!
//! Built from the container cgroup's statistics files: CPU, memory, I/O and
//! task counts.

use chrono::{DateTime, Utc};
use corral_common::types::ContainerId;
use corral_core::cgroup::CgroupStats;
use serde::{Deserialize, Serialize};

/// Snapshot of a container's resource usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Container this snapshot belongs to.
    pub container_id: ContainerId,
    /// When the counters were read.
    pub collected_at: DateTime<Utc>,
    /// Total CPU time in microseconds.
    pub cpu_usage_usec: u64,
    /// User-mode CPU time in microseconds.
    pub cpu_user_usec: u64,
    /// Kernel-mode CPU time in microseconds.
    pub cpu_system_usec: u64,
    /// Memory usage in bytes.
    pub memory_usage_bytes: u64,
    /// Hard memory limit in bytes, if any.
    pub memory_limit_bytes: Option<u64>,
    /// Number of tasks in the cgroup.
    pub pids: u64,
    /// Bytes read from block devices.
    pub io_read_bytes: u64,
    /// Bytes written to block devices.
    pub io_write_bytes: u64,
}

impl MetricsSnapshot {
    /// Builds a snapshot from raw cgroup counters.
    #[must_use]
    pub fn from_cgroup(container_id: ContainerId, stats: &CgroupStats) -> Self {
        Self {
            container_id,
            collected_at: Utc::now(),
            cpu_usage_usec: stats.cpu_usage_usec,
            cpu_user_usec: stats.cpu_user_usec,
            cpu_system_usec: stats.cpu_system_usec,
            memory_usage_bytes: stats.memory_current,
            memory_limit_bytes: stats.memory_max,
            pids: stats.pids_current,
            io_read_bytes: stats.io_read_bytes,
            io_write_bytes: stats.io_write_bytes,
        }
    }

    /// Memory usage as a fraction of the limit, when there is one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn memory_utilization(&self) -> Option<f64> {
        self.memory_limit_bytes
            .filter(|&max| max > 0)
            .map(|max| self.memory_usage_bytes as f64 / max as f64)
    }
}
