//! Linux capability management for least-privilege execution.
//!
//! Every capability not retained by the process descriptor is dropped from
//! the bounding set right before `execve`, so the executed program can never
//! regain it.

use std::fmt;
use std::str::FromStr;

use corral_common::error::{CorralError, Result};
use serde::{Deserialize, Serialize};

macro_rules! capabilities {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Linux capability identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum Capability {
            $(
                #[doc = $name]
                $variant = $value,
            )+
        }

        impl Capability {
            /// Every capability known to the runtime.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Returns the `CAP_*` name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

capabilities! {
    Chown = 0 => "CAP_CHOWN",
    DacOverride = 1 => "CAP_DAC_OVERRIDE",
    DacReadSearch = 2 => "CAP_DAC_READ_SEARCH",
    Fowner = 3 => "CAP_FOWNER",
    Fsetid = 4 => "CAP_FSETID",
    Kill = 5 => "CAP_KILL",
    Setgid = 6 => "CAP_SETGID",
    Setuid = 7 => "CAP_SETUID",
    Setpcap = 8 => "CAP_SETPCAP",
    LinuxImmutable = 9 => "CAP_LINUX_IMMUTABLE",
    NetBindService = 10 => "CAP_NET_BIND_SERVICE",
    NetBroadcast = 11 => "CAP_NET_BROADCAST",
    NetAdmin = 12 => "CAP_NET_ADMIN",
    NetRaw = 13 => "CAP_NET_RAW",
    IpcLock = 14 => "CAP_IPC_LOCK",
    IpcOwner = 15 => "CAP_IPC_OWNER",
    SysModule = 16 => "CAP_SYS_MODULE",
    SysRawio = 17 => "CAP_SYS_RAWIO",
    SysChroot = 18 => "CAP_SYS_CHROOT",
    SysPtrace = 19 => "CAP_SYS_PTRACE",
    SysPacct = 20 => "CAP_SYS_PACCT",
    SysAdmin = 21 => "CAP_SYS_ADMIN",
    SysBoot = 22 => "CAP_SYS_BOOT",
    SysNice = 23 => "CAP_SYS_NICE",
    SysResource = 24 => "CAP_SYS_RESOURCE",
    SysTime = 25 => "CAP_SYS_TIME",
    SysTtyConfig = 26 => "CAP_SYS_TTY_CONFIG",
    Mknod = 27 => "CAP_MKNOD",
    Lease = 28 => "CAP_LEASE",
    AuditWrite = 29 => "CAP_AUDIT_WRITE",
    AuditControl = 30 => "CAP_AUDIT_CONTROL",
    Setfcap = 31 => "CAP_SETFCAP",
    MacOverride = 32 => "CAP_MAC_OVERRIDE",
    MacAdmin = 33 => "CAP_MAC_ADMIN",
    Syslog = 34 => "CAP_SYSLOG",
    WakeAlarm = 35 => "CAP_WAKE_ALARM",
    BlockSuspend = 36 => "CAP_BLOCK_SUSPEND",
    AuditRead = 37 => "CAP_AUDIT_READ",
    Perfmon = 38 => "CAP_PERFMON",
    Bpf = 39 => "CAP_BPF",
    CheckpointRestore = 40 => "CAP_CHECKPOINT_RESTORE",
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = CorralError;

    /// Accepts `CAP_NET_ADMIN` or `net_admin`, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        let wanted = upper.strip_prefix("CAP_").unwrap_or(&upper);
        Self::ALL
            .iter()
            .copied()
            .find(|cap| &cap.name()[4..] == wanted)
            .ok_or_else(|| CorralError::Config {
                message: format!("unknown capability {s:?}"),
            })
    }
}

impl TryFrom<String> for Capability {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.name().to_owned()
    }
}

/// A set of capabilities packed into a bitmask, usable without allocation
/// in a freshly forked child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    /// Returns the set containing `caps`.
    #[must_use]
    pub fn from_caps(caps: &[Capability]) -> Self {
        Self(caps.iter().fold(0, |mask, cap| mask | (1u64 << (*cap as u8))))
    }

    /// Returns whether `cap` is in the set.
    #[must_use]
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & (1u64 << (cap as u8)) != 0
    }

    /// Drops every capability outside this set from the calling thread's
    /// bounding set.
    ///
    /// Capabilities the running kernel does not know are skipped.
    /// Async-signal-safe.
    ///
    /// # Errors
    ///
    /// Returns the errno of the first `PR_CAPBSET_DROP` that fails for a
    /// reason other than an unknown capability.
    #[cfg(target_os = "linux")]
    pub fn drop_others(self) -> std::result::Result<(), nix::errno::Errno> {
        for cap in Capability::ALL {
            if self.contains(*cap) {
                continue;
            }
            // SAFETY: prctl(PR_CAPBSET_DROP) takes the capability number as its
            // only argument and touches no caller memory.
            let rc = unsafe { libc::prctl(libc::PR_CAPBSET_DROP, *cap as libc::c_ulong, 0, 0, 0) };
            if rc != 0 {
                let errno = nix::errno::Errno::last();
                if errno != nix::errno::Errno::EINVAL {
                    return Err(errno);
                }
            }
        }
        Ok(())
    }
}
