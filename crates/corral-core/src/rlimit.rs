//! Resource limits applied to a process before it executes.

use corral_common::types::{Rlimit, RlimitResource};
use nix::errno::Errno;
use nix::sys::resource::{Resource, setrlimit};

const fn resource(kind: RlimitResource) -> Resource {
    match kind {
        RlimitResource::RlimitAs => Resource::RLIMIT_AS,
        RlimitResource::RlimitCore => Resource::RLIMIT_CORE,
        RlimitResource::RlimitCpu => Resource::RLIMIT_CPU,
        RlimitResource::RlimitData => Resource::RLIMIT_DATA,
        RlimitResource::RlimitFsize => Resource::RLIMIT_FSIZE,
        RlimitResource::RlimitMemlock => Resource::RLIMIT_MEMLOCK,
        RlimitResource::RlimitNofile => Resource::RLIMIT_NOFILE,
        RlimitResource::RlimitNproc => Resource::RLIMIT_NPROC,
        RlimitResource::RlimitStack => Resource::RLIMIT_STACK,
    }
}

/// Applies each limit to the calling process. Async-signal-safe.
///
/// # Errors
///
/// Returns the errno of the first `setrlimit(2)` that fails.
pub fn apply_rlimits(limits: &[Rlimit]) -> Result<(), Errno> {
    for limit in limits {
        setrlimit(resource(limit.resource), limit.soft, limit.hard)?;
    }
    Ok(())
}
