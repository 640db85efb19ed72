//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default state root when running as root on Linux.
pub const SYSTEM_STATE_ROOT: &str = "/run/corral";

/// Returns the state root, preferring `$HOME/.corral/state` when it can be
/// created, falling back to `/run/corral`.
fn resolve_state_root() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".corral").join("state");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_STATE_ROOT)
}

static STATE_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved state root for this session.
pub fn state_root() -> &'static PathBuf {
    STATE_ROOT.get_or_init(resolve_state_root)
}

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Name of the durable record file inside a container's state directory.
pub const STATE_FILENAME: &str = "state.json";

/// Name of the exec handshake FIFO inside a container's state directory.
pub const EXEC_FIFO_FILENAME: &str = "exec.fifo";

/// Name of the per-bundle container configuration file read by the CLI.
pub const BUNDLE_CONFIG_FILENAME: &str = "corral.json";

/// Default upper bound for the exec handshake, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Delay between attempts to open the handshake FIFO for writing.
pub const HANDSHAKE_RETRY_INTERVAL_MS: u64 = 10;

/// OCI runtime-spec version reported in state documents.
pub const OCI_VERSION: &str = "1.0.2";

/// Maximum length of a container ID, in bytes.
pub const MAX_ID_LENGTH: usize = 1024;

/// Application name used in cgroup paths and state files.
pub const APP_NAME: &str = "corral";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "corral";
