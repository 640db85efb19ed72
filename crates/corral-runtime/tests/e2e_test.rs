//! End-to-end tests against the real kernel.
//!
//! These need root, a cgroup v2 hierarchy at `/sys/fs/cgroup` and `sleep`
//! on the host `PATH`. Run with `cargo test -- --ignored`.

#![cfg(target_os = "linux")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Read;
use std::path::PathBuf;

use corral_common::config::{ContainerConfig, RuntimeConfig};
use corral_common::error::CorralError;
use corral_common::types::{ContainerId, Status};
use corral_runtime::container::linux_backends;
use corral_runtime::{Container, ExitStatus, Process};
use nix::sys::signal::Signal;

fn container(root: &tempfile::TempDir, name: &str, pid_namespace: bool) -> Container {
    let runtime = RuntimeConfig::with_root(root.path());
    let (store, platform) = linux_backends(&runtime);
    let mut config = ContainerConfig {
        cgroup_path: Some(PathBuf::from("corral-test").join(name)),
        ..ContainerConfig::default()
    };
    config.namespaces.pid = pid_namespace;
    Container::new(ContainerId::new(name).unwrap(), config, runtime, store, platform)
}

#[test]
#[ignore = "requires root and cgroup v2"]
fn sleep_container_full_lifecycle() {
    let root = tempfile::tempdir().unwrap();
    // Outside a pid namespace `sleep` keeps the default SIGTERM action.
    let c = container(&root, "e2e-sleep", false);
    let mut init = Process::init(vec!["sleep".into(), "100".into()]);
    init.env = vec!["PATH=/usr/bin:/bin".into()];

    c.run(&mut init).unwrap();
    assert_eq!(c.status().unwrap(), Status::Created);
    assert_eq!(c.processes().unwrap(), vec![init.pid().unwrap()]);

    c.exec().unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);
    assert!(matches!(c.exec(), Err(CorralError::AlreadyExecuted { .. })));

    c.signal(Signal::SIGTERM, false).unwrap();
    assert_eq!(init.wait().unwrap(), ExitStatus::Signaled(Signal::SIGTERM));
    assert_eq!(c.status().unwrap(), Status::Stopped);

    c.destroy().unwrap();
    assert!(matches!(c.status(), Err(CorralError::NotFound { .. })));
}

#[test]
#[ignore = "requires root and cgroup v2"]
fn exec_process_sees_container_pid_namespace() {
    let root = tempfile::tempdir().unwrap();
    let c = container(&root, "e2e-exec", true);
    let mut init = Process::init(vec!["sleep".into(), "100".into()]);
    init.env = vec!["PATH=/usr/bin:/bin".into()];
    c.start(&mut init).unwrap();

    let mut shell = Process::new(vec!["sh".into(), "-c".into(), "echo $$".into()]);
    shell.env = vec!["PATH=/usr/bin:/bin".into()];
    c.start(&mut shell).unwrap();
    let mut out = String::new();
    let _ = shell.take_stdout().unwrap().read_to_string(&mut out).unwrap();
    assert!(shell.wait().unwrap().success());
    // The init is pid 1 inside the namespace, so the shell is not.
    assert_ne!(out.trim(), shell.pid().unwrap().to_string());
    assert_ne!(out.trim(), "1");

    c.signal(Signal::SIGKILL, true).unwrap();
    let _ = init.wait().unwrap();
    c.destroy().unwrap();
}

#[test]
#[ignore = "requires root and cgroup v2"]
fn pid_namespace_init_ignores_sigterm() {
    let root = tempfile::tempdir().unwrap();
    let c = container(&root, "e2e-pidns", true);
    let mut init = Process::init(vec!["sleep".into(), "100".into()]);
    init.env = vec!["PATH=/usr/bin:/bin".into()];
    c.start(&mut init).unwrap();

    c.signal(Signal::SIGTERM, false).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(500));
    assert_eq!(c.status().unwrap(), Status::Running);

    c.signal(Signal::SIGKILL, false).unwrap();
    assert_eq!(init.wait().unwrap(), ExitStatus::Signaled(Signal::SIGKILL));
    assert_eq!(c.status().unwrap(), Status::Stopped);
    c.destroy().unwrap();
}
