//! Work done inside a freshly cloned child, between `clone(2)` and
//! `execve(2)`.
//!
//! The runtime may be multi-threaded, so the child must not allocate, lock
//! or log. Everything it needs is converted into C strings and raw
//! descriptors by [`ChildSetup::new`] before the clone; [`ChildSetup::run`]
//! only issues system calls.

use std::ffi::{CString, OsString, c_char};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::NoNewPrivileges;
use corral_core::capability::CapabilitySet;
use corral_core::namespace::NamespaceHandle;
use corral_core::security::{self, ExecLabel};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid};

use super::SpawnRequest;

/// Exit code of a child whose setup failed before exec.
pub(crate) const SETUP_FAILED: isize = 126;
/// Exit code of a child whose command could not be executed.
pub(crate) const EXEC_FAILED: isize = 127;

/// Size of a failure report written to the error pipe.
const REPORT_LEN: usize = 8;

/// Step of the child pipeline, reported alongside the errno on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Stage {
    Handshake,
    Cgroup,
    Setns,
    Stdio,
    ExtraFiles,
    Hostname,
    Rootfs,
    Rlimits,
    Console,
    Label,
    Capabilities,
    NoNewPrivileges,
    Identity,
    Cwd,
    Exec,
}

impl Stage {
    const ALL: [Self; 15] = [
        Self::Handshake,
        Self::Cgroup,
        Self::Setns,
        Self::Stdio,
        Self::ExtraFiles,
        Self::Hostname,
        Self::Rootfs,
        Self::Rlimits,
        Self::Console,
        Self::Label,
        Self::Capabilities,
        Self::NoNewPrivileges,
        Self::Identity,
        Self::Cwd,
        Self::Exec,
    ];

    const fn operation(self) -> &'static str {
        match self {
            Self::Handshake => "wait for exec handshake",
            Self::Cgroup => "join cgroup",
            Self::Setns => "setns",
            Self::Stdio => "set up stdio",
            Self::ExtraFiles => "pass extra files",
            Self::Hostname => "sethostname",
            Self::Rootfs => "chroot",
            Self::Rlimits => "setrlimit",
            Self::Console => "set console size",
            Self::Label => "set security label",
            Self::Capabilities => "drop capabilities",
            Self::NoNewPrivileges => "set no_new_privs",
            Self::Identity => "switch user",
            Self::Cwd => "chdir",
            Self::Exec => "execvpe",
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| *stage as u32 == code)
    }
}

type StepResult = std::result::Result<(), (Stage, Errno)>;

/// Builds the pointer array `execvpe` expects; the strings must outlive it.
fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn at(stage: Stage) -> impl Fn(Errno) -> (Stage, Errno) {
    move |errno| (stage, errno)
}

/// Precomputed state for one child process.
pub(crate) struct ChildSetup {
    program: CString,
    /// Owns the strings `argv` points into.
    _args: Vec<CString>,
    /// Owns the strings `envp` points into.
    _env: Vec<CString>,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
    stdio: [RawFd; 3],
    extra: Vec<RawFd>,
    relocated: Vec<RawFd>,
    handshake: Option<CString>,
    cgroup_procs: Option<CString>,
    joins: Vec<NamespaceHandle>,
    hostname: Option<OsString>,
    rootfs: Option<CString>,
    cwd: CString,
    rlimits: Vec<corral_common::types::Rlimit>,
    console: Option<corral_common::types::ConsoleSize>,
    labels: Vec<ExecLabel>,
    capabilities: Option<CapabilitySet>,
    no_new_privileges: bool,
    uid: Uid,
    gid: Gid,
    groups: Option<Vec<Gid>>,
    error_pipe: Option<RawFd>,
}

impl ChildSetup {
    /// Converts a spawn request into child-safe form.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] for an empty command or strings
    /// containing NUL bytes.
    pub(crate) fn new(request: &SpawnRequest<'_>) -> Result<Self> {
        let process = request.process;
        let config = request.config;

        let args = process
            .args
            .iter()
            .map(|a| cstring(a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let program = args.first().cloned().ok_or_else(|| CorralError::Config {
            message: "process args must not be empty".into(),
        })?;
        let env = process
            .env
            .iter()
            .map(|e| cstring(e.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let mut labels = Vec::new();
        if let Some(profile) = &process.apparmor_profile {
            labels.push(ExecLabel::apparmor(profile)?);
        }
        if let Some(label) = &process.label {
            labels.push(ExecLabel::selinux(label)?);
        }

        let cwd = process.cwd.as_deref().unwrap_or_else(|| Path::new("/"));
        let rootfs = config
            .rootfs
            .as_deref()
            .map(|p| cstring(p.as_os_str().as_bytes()))
            .transpose()?;
        let hostname = config
            .hostname
            .as_ref()
            .filter(|_| config.namespaces.uts)
            .map(OsString::from);

        // setgroups is denied inside a user namespace created by an
        // unprivileged runtime.
        let setgroups_denied = config.namespaces.user && !nix::unistd::geteuid().is_root();
        let groups = (!setgroups_denied).then(|| {
            process
                .additional_groups
                .iter()
                .copied()
                .map(Gid::from_raw)
                .collect()
        });

        let extra: Vec<RawFd> = process.extra_files.iter().map(AsRawFd::as_raw_fd).collect();
        let argv = null_terminated(&args);
        let envp = null_terminated(&env);
        Ok(Self {
            program,
            _args: args,
            _env: env,
            argv,
            envp,
            stdio: [
                request.stdio.stdin.as_raw_fd(),
                request.stdio.stdout.as_raw_fd(),
                request.stdio.stderr.as_raw_fd(),
            ],
            relocated: vec![-1; extra.len()],
            extra,
            handshake: None,
            cgroup_procs: None,
            joins: Vec::new(),
            hostname,
            rootfs,
            cwd: cstring(cwd.as_os_str().as_bytes())?,
            rlimits: process.rlimits.clone(),
            console: process.console_size,
            labels,
            capabilities: process.capabilities.as_deref().map(CapabilitySet::from_caps),
            no_new_privileges: process.no_new_privileges == NoNewPrivileges::Enabled,
            uid: Uid::from_raw(process.user.uid),
            gid: Gid::from_raw(process.user.gid),
            groups,
            error_pipe: None,
        })
    }

    /// Blocks the child on the FIFO behind `fifo` until it is released.
    ///
    /// The FIFO is reopened through `/proc/self/fd`, which works even after
    /// the child has entered a user namespace that cannot traverse the
    /// state directory.
    pub(crate) fn with_handshake(mut self, fifo: &impl AsRawFd) -> Result<Self> {
        let path = format!("/proc/self/fd/{}", fifo.as_raw_fd());
        self.handshake = Some(cstring(path.as_bytes())?);
        Ok(self)
    }

    /// Moves the child into the cgroup whose `cgroup.procs` is at `procs`.
    pub(crate) fn with_cgroup(mut self, procs: &Path) -> Result<Self> {
        self.cgroup_procs = Some(cstring(procs.as_os_str().as_bytes())?);
        Ok(self)
    }

    /// Joins `namespaces`, in order, before anything else is set up.
    pub(crate) fn joining(mut self, namespaces: Vec<NamespaceHandle>) -> Self {
        self.joins = namespaces;
        self
    }

    /// Reports setup failures on `pipe` instead of only through the exit
    /// code.
    pub(crate) fn reporting_to(mut self, pipe: &impl AsRawFd) -> Self {
        self.error_pipe = Some(pipe.as_raw_fd());
        self
    }

    /// Runs the pipeline and executes the command. Only returns on failure,
    /// with the exit code the child should terminate with.
    pub(crate) fn run(&mut self) -> isize {
        if let Err((stage, errno)) = self.setup() {
            self.report(stage, errno);
            return SETUP_FAILED;
        }
        // SAFETY: `argv` and `envp` are NULL-terminated and point into
        // CStrings owned by `self`, which outlives the call.
        unsafe {
            let _ = libc::execvpe(self.program.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr());
        }
        self.report(Stage::Exec, Errno::last());
        EXEC_FAILED
    }

    fn setup(&mut self) -> StepResult {
        if let Some(fifo) = &self.handshake {
            wait_for_release(fifo).map_err(at(Stage::Handshake))?;
        }
        if let Some(procs) = &self.cgroup_procs {
            write_path(procs, b"0").map_err(at(Stage::Cgroup))?;
        }
        for ns in &self.joins {
            nix::sched::setns(ns.fd.as_fd(), ns.kind.clone_flag()).map_err(at(Stage::Setns))?;
        }

        self.relocate_descriptors().map_err(at(Stage::ExtraFiles))?;
        for (target, fd) in (0..).zip(self.stdio) {
            dup2(fd, target).map_err(at(Stage::Stdio))?;
        }
        for (target, fd) in (3..).zip(self.relocated.iter().copied()) {
            dup2(fd, target).map_err(at(Stage::ExtraFiles))?;
        }

        if let Some(hostname) = &self.hostname {
            nix::unistd::sethostname(hostname).map_err(at(Stage::Hostname))?;
        }
        if let Some(rootfs) = &self.rootfs {
            nix::unistd::chroot(rootfs.as_c_str()).map_err(at(Stage::Rootfs))?;
            nix::unistd::chdir(c"/").map_err(at(Stage::Rootfs))?;
        }
        corral_core::rlimit::apply_rlimits(&self.rlimits).map_err(at(Stage::Rlimits))?;
        if let Some(size) = self.console {
            match security::set_window_size(0, size) {
                Ok(()) | Err(Errno::ENOTTY) => {}
                Err(errno) => return Err((Stage::Console, errno)),
            }
        }
        for label in &self.labels {
            label.apply().map_err(at(Stage::Label))?;
        }
        if let Some(caps) = self.capabilities {
            caps.drop_others().map_err(at(Stage::Capabilities))?;
        }
        if self.no_new_privileges {
            security::set_no_new_privileges().map_err(at(Stage::NoNewPrivileges))?;
        }

        if let Some(groups) = &self.groups {
            nix::unistd::setgroups(groups).map_err(at(Stage::Identity))?;
        }
        nix::unistd::setresgid(self.gid, self.gid, self.gid).map_err(at(Stage::Identity))?;
        nix::unistd::setresuid(self.uid, self.uid, self.uid).map_err(at(Stage::Identity))?;
        nix::unistd::chdir(self.cwd.as_c_str()).map_err(at(Stage::Cwd))
    }

    /// Moves extra files and the error pipe above the range the extra files
    /// are mapped onto, so mapping one cannot clobber another.
    fn relocate_descriptors(&mut self) -> std::result::Result<(), Errno> {
        let floor = 3 + RawFd::try_from(self.extra.len()).map_err(|_| Errno::EMFILE)?;
        for (slot, fd) in self.relocated.iter_mut().zip(&self.extra) {
            *slot = dup_above(*fd, floor)?;
        }
        if let Some(pipe) = self.error_pipe {
            self.error_pipe = Some(dup_above(pipe, floor)?);
        }
        Ok(())
    }

    fn report(&self, stage: Stage, errno: Errno) {
        let Some(pipe) = self.error_pipe else {
            return;
        };
        let mut buf = [0u8; REPORT_LEN];
        buf[..4].copy_from_slice(&(stage as u32).to_le_bytes());
        buf[4..].copy_from_slice(&(errno as i32).to_le_bytes());
        // SAFETY: writes from a live stack buffer to a descriptor we own.
        let _ = unsafe { libc::write(pipe, buf.as_ptr().cast(), REPORT_LEN) };
    }
}

/// Reads a failure report from the read end of a child's error pipe.
///
/// Returns `None` if the pipe reached EOF without a report, which means the
/// command was executed.
///
/// # Errors
///
/// Returns an error if the pipe cannot be read.
pub(crate) fn read_failure(pipe: OwnedFd) -> Result<Option<CorralError>> {
    let mut file = File::from(pipe);
    let mut buf = [0u8; REPORT_LEN];
    let mut filled = 0;
    while filled < REPORT_LEN {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CorralError::os("read child error pipe", e)),
        }
    }
    Ok(decode_report(&buf[..filled]))
}

fn decode_report(report: &[u8]) -> Option<CorralError> {
    if report.is_empty() {
        return None;
    }
    let (Ok(stage), Ok(errno)) = (
        <[u8; 4]>::try_from(report.get(..4).unwrap_or_default()),
        <[u8; 4]>::try_from(report.get(4..).unwrap_or_default()),
    ) else {
        return Some(CorralError::os(
            "spawn",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated child error report"),
        ));
    };
    let operation = Stage::from_code(u32::from_le_bytes(stage)).map_or("spawn", Stage::operation);
    Some(CorralError::os(
        operation,
        std::io::Error::from_raw_os_error(i32::from_le_bytes(errno)),
    ))
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| CorralError::Config {
        message: format!("{:?} contains a NUL byte", String::from_utf8_lossy(bytes)),
    })
}

fn wait_for_release(fifo: &CString) -> std::result::Result<(), Errno> {
    // SAFETY: `fifo` is a valid NUL-terminated path.
    let fd = Errno::result(unsafe { libc::open(fifo.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) })?;
    let mut byte = 0u8;
    let outcome = loop {
        // SAFETY: reads one byte into a live stack variable.
        let n = unsafe { libc::read(fd, (&raw mut byte).cast(), 1) };
        match Errno::result(n) {
            Err(Errno::EINTR) => {}
            Ok(1) => break Ok(()),
            Ok(_) => break Err(Errno::EPIPE),
            Err(errno) => break Err(errno),
        }
    };
    // SAFETY: `fd` was opened above and is not used afterwards.
    let _ = unsafe { libc::close(fd) };
    outcome
}

fn write_path(path: &CString, data: &[u8]) -> std::result::Result<(), Errno> {
    // SAFETY: `path` is a valid NUL-terminated path.
    let fd = Errno::result(unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) })?;
    // SAFETY: writes from a live slice to the descriptor opened above.
    let written = Errno::result(unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) });
    // SAFETY: `fd` was opened above and is not used afterwards.
    let _ = unsafe { libc::close(fd) };
    written.map(drop)
}

fn dup2(fd: RawFd, target: RawFd) -> std::result::Result<(), Errno> {
    if fd == target {
        return Ok(());
    }
    // SAFETY: dup2 only manipulates the descriptor table.
    Errno::result(unsafe { libc::dup2(fd, target) }).map(drop)
}

fn dup_above(fd: RawFd, floor: RawFd) -> std::result::Result<RawFd, Errno> {
    // SAFETY: F_DUPFD_CLOEXEC only manipulates the descriptor table.
    Errno::result(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_codes_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_code(stage as u32), Some(stage));
        }
        assert_eq!(Stage::from_code(99), None);
    }

    #[test]
    fn empty_report_means_exec_succeeded() {
        assert!(decode_report(&[]).is_none());
    }

    #[test]
    fn report_decodes_stage_and_errno() {
        let mut report = [0u8; REPORT_LEN];
        report[..4].copy_from_slice(&(Stage::Exec as u32).to_le_bytes());
        report[4..].copy_from_slice(&libc::ENOENT.to_le_bytes());
        match decode_report(&report) {
            Some(CorralError::Os { operation, source }) => {
                assert_eq!(operation, "execvpe");
                assert_eq!(source.raw_os_error(), Some(libc::ENOENT));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_report_is_invalid_data() {
        assert!(matches!(
            decode_report(&[1, 0]),
            Some(CorralError::Os { operation: "spawn", .. })
        ));
    }

    #[test]
    fn exec_arrays_are_prepared_before_clone() {
        let config = corral_common::config::ContainerConfig::default();
        let id = corral_common::types::ContainerId::new("c1").unwrap();
        let mut process = crate::Process::new(vec!["ls".into(), "-l".into()]);
        process.env = vec!["PATH=/bin".into()];
        let (stdio, _io) = crate::io::prepare(&mut process).unwrap();
        let request = SpawnRequest {
            id: &id,
            config: &config,
            cgroup: "corral/c1".into(),
            process: &process,
            stdio: &stdio,
            handshake: None,
        };

        let setup = ChildSetup::new(&request).unwrap();
        assert_eq!(setup.argv.len(), 3);
        assert_eq!(setup.envp.len(), 2);
        assert!(setup.argv[2].is_null());
        assert!(setup.envp[1].is_null());
        // SAFETY: the pointers reference CStrings owned by `setup`.
        let second = unsafe { std::ffi::CStr::from_ptr(setup.argv[1]) };
        assert_eq!(second.to_bytes(), b"-l");
        assert_eq!(setup.program.as_bytes(), b"ls");
    }

    #[test]
    fn failure_pipe_reads_child_report() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let mut report = [0u8; REPORT_LEN];
        report[..4].copy_from_slice(&(Stage::Cwd as u32).to_le_bytes());
        report[4..].copy_from_slice(&libc::EACCES.to_le_bytes());
        let _ = nix::unistd::write(&write, &report).unwrap();
        drop(write);

        let err = read_failure(read).unwrap().unwrap();
        assert!(matches!(err, CorralError::Os { operation: "chdir", .. }));
    }
}
