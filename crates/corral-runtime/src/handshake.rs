//! The exec handshake: a named FIFO the init process blocks on until the
//! user command is released.
//!
//! The FIFO lives in the container's state directory, so any runtime
//! invocation can release a container created by another one.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use corral_common::constants::{EXEC_FIFO_FILENAME, HANDSHAKE_RETRY_INTERVAL_MS};
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;
use nix::sys::stat::Mode;

/// Owner writes, the parked init reads.
const FIFO_MODE: u32 = 0o644;

/// Handle on a container's exec FIFO.
#[derive(Debug, Clone)]
pub struct ExecFifo {
    path: PathBuf,
}

impl ExecFifo {
    /// Refers to the FIFO inside `state_dir`. Nothing is created.
    #[must_use]
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(EXEC_FIFO_FILENAME),
        }
    }

    /// Path of the FIFO.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` while the handshake has not been released.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Creates the FIFO.
    ///
    /// # Errors
    ///
    /// Returns an error if the FIFO already exists or cannot be created.
    pub fn create(&self) -> Result<()> {
        nix::unistd::mkfifo(&self.path, Mode::from_bits_truncate(FIFO_MODE))
            .map_err(|e| self.io_error(e.into()))?;
        // mkfifo honours the umask
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(FIFO_MODE))
            .map_err(|e| self.io_error(e))?;
        tracing::debug!(path = %self.path.display(), "exec handshake created");
        Ok(())
    }

    /// Unblocks the init process and removes the FIFO.
    ///
    /// Opening for write without blocking fails with `ENXIO` until the init
    /// has opened its read end, so the open is retried until `timeout`
    /// expires.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::HandshakeTimeout`] if the init never reached
    /// the handshake, [`CorralError::AlreadyExecuted`] if another invocation
    /// released it first, or an I/O error.
    pub fn release(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut fifo = loop {
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
                .open(&self.path)
            {
                Ok(file) => break file,
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                    if Instant::now() >= deadline {
                        return Err(CorralError::HandshakeTimeout {
                            id: id.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(HANDSHAKE_RETRY_INTERVAL_MS));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(CorralError::AlreadyExecuted { id: id.to_string() });
                }
                Err(e) => return Err(self.io_error(e)),
            }
        };

        fifo.write_all(&[0]).map_err(|e| self.io_error(e))?;
        drop(fifo);
        self.remove()?;
        tracing::debug!(id = %id, "exec handshake released");
        Ok(())
    }

    /// Removes the FIFO. A missing FIFO is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> CorralError {
        CorralError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
