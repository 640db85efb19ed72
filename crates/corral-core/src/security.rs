//! Process security attributes set between fork and exec: the
//! no-new-privileges bit, LSM exec labels, and console geometry.
//!
//! Everything here is async-signal-safe once constructed, so it can run in a
//! child forked from a multi-threaded runtime.

use std::ffi::CString;
use std::os::fd::RawFd;

use corral_common::error::{CorralError, Result};
use corral_common::types::ConsoleSize;
use nix::errno::Errno;

/// Sets `PR_SET_NO_NEW_PRIVS` on the calling thread.
///
/// # Errors
///
/// Returns the errno if `prctl(2)` fails.
pub fn set_no_new_privileges() -> std::result::Result<(), Errno> {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes integer arguments only.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    Errno::result(rc).map(drop)
}

/// A Linux Security Module label applied at the next `execve`.
#[derive(Debug, Clone)]
pub struct ExecLabel {
    path: CString,
    value: CString,
}

impl ExecLabel {
    /// An `AppArmor` profile transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile contains a NUL byte.
    pub fn apparmor(profile: &str) -> Result<Self> {
        Self::new("/proc/self/attr/apparmor/exec", &format!("exec {profile}"))
    }

    /// An `SELinux` process label.
    ///
    /// # Errors
    ///
    /// Returns an error if the label contains a NUL byte.
    pub fn selinux(label: &str) -> Result<Self> {
        Self::new("/proc/self/attr/exec", label)
    }

    fn new(path: &str, value: &str) -> Result<Self> {
        let nul = |_| CorralError::Config {
            message: format!("security label {value:?} contains a NUL byte"),
        };
        Ok(Self {
            path: CString::new(path).map_err(nul)?,
            value: CString::new(value).map_err(nul)?,
        })
    }

    /// Writes the label. Async-signal-safe.
    ///
    /// # Errors
    ///
    /// Returns the errno of a failed open or write.
    pub fn apply(&self) -> std::result::Result<(), Errno> {
        // SAFETY: path is a valid NUL-terminated string owned by self.
        let fd = unsafe { libc::open(self.path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
        let fd = Errno::result(fd)?;
        let bytes = self.value.as_bytes();
        // SAFETY: bytes points to bytes.len() readable bytes; fd was just opened.
        let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        // SAFETY: fd is owned here and closed exactly once.
        let _ = unsafe { libc::close(fd) };
        Errno::result(written).map(drop)
    }
}

/// Sets the window size of the terminal behind `fd`. Async-signal-safe.
///
/// # Errors
///
/// Returns the errno if `ioctl(TIOCSWINSZ)` fails, e.g. `ENOTTY`.
pub fn set_window_size(fd: RawFd, size: ConsoleSize) -> std::result::Result<(), Errno> {
    let winsize = libc::winsize {
        ws_row: size.height,
        ws_col: size.width,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ reads one winsize struct from the pointer, which
    // lives on this stack frame for the duration of the call.
    let rc = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &raw const winsize) };
    Errno::result(rc).map(drop)
}
