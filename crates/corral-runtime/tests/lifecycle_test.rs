//! Lifecycle manager behaviour against a fake platform.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use std::time::Duration;

use corral_common::config::ContainerConfig;
use corral_common::error::CorralError;
use corral_common::types::{FreezeState, ResourceLimits, Status};
use corral_runtime::process::UNBOUND_PID;
use corral_runtime::{ExitStatus, Process};
use nix::sys::signal::Signal;
use support::Harness;

fn init() -> Process {
    Process::init(vec!["sleep".into(), "100".into()])
}

// ── Create / exec ────────────────────────────────────────────────────

#[test]
fn run_leaves_container_created() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();

    c.run(&mut p).unwrap();

    assert_eq!(c.status().unwrap(), Status::Created);
    let pid = p.pid().unwrap();
    assert_eq!(c.record().unwrap().init_process_pid, pid);
    assert_eq!(c.tracked_processes(), vec![pid]);
    assert_eq!(c.oci_state().unwrap().pid, Some(pid));
    assert!(h.runtime.container_dir(c.id()).join("exec.fifo").exists());
}

#[test]
fn exec_runs_the_container_once() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();

    c.exec().unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);
    assert!(!h.runtime.container_dir(c.id()).join("exec.fifo").exists());

    assert!(matches!(c.exec(), Err(CorralError::AlreadyExecuted { .. })));
}

#[test]
fn start_of_init_goes_straight_to_running() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();

    c.start(&mut p).unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);
}

#[test]
fn exec_times_out_when_init_never_reaches_handshake() {
    let mut h = Harness::new();
    h.runtime.handshake_timeout = Duration::from_millis(50);
    h.platform.skip_handshake();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();

    assert!(matches!(
        c.exec(),
        Err(CorralError::HandshakeTimeout { .. })
    ));
    assert_eq!(c.status().unwrap(), Status::Created);
}

#[test]
fn exec_after_init_died_is_invalid_state() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();

    h.platform.exit(p.pid().unwrap(), 1);
    assert_eq!(c.status().unwrap(), Status::Stopped);
    assert!(matches!(c.exec(), Err(CorralError::InvalidState { .. })));
}

#[test]
fn creating_an_existing_container_is_invalid_state() {
    let h = Harness::new();
    h.container("web").run(&mut init()).unwrap();

    let again = h.container("web");
    match again.run(&mut init()) {
        Err(CorralError::InvalidState { operation, status, .. }) => {
            assert_eq!(operation, "create");
            assert_eq!(status, "created");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn bound_descriptor_cannot_be_submitted_again() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();

    let other = h.container("other");
    assert!(matches!(other.run(&mut p), Err(CorralError::InvalidProcess)));
    assert!(matches!(other.start(&mut p), Err(CorralError::InvalidProcess)));
}

#[test]
fn unset_stdio_is_piped_back_to_caller() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();

    let io = p.take_io().unwrap();
    assert!(io.stdin.is_some() && io.stdout.is_some() && io.stderr.is_some());
    assert!(p.take_io().is_none());
}

#[test]
fn failed_spawn_hands_caller_stdio_back() {
    let h = Harness::new();
    let c = h.container("web");
    let (read, _write) = nix::unistd::pipe().unwrap();
    let mut p = init();
    p.stdin = Some(read);

    h.platform.fail_next_spawn();
    assert!(c.run(&mut p).is_err());
    assert!(p.stdin.is_some());
    assert!(p.stdout.is_none());

    c.run(&mut p).unwrap();
    let io = p.take_io().unwrap();
    assert!(io.stdin.is_none());
    assert!(io.stdout.is_some());
}

#[test]
fn failed_join_hands_caller_stdio_back() {
    let h = Harness::new();
    let c = h.container("web");
    let mut first = init();
    c.start(&mut first).unwrap();
    let (_read, write) = nix::unistd::pipe().unwrap();
    let mut p = Process::new(vec!["ps".into()]);
    p.stdout = Some(write);

    h.platform.fail_next_spawn();
    assert!(c.start(&mut p).is_err());
    assert!(p.stdout.is_some());
    assert!(p.pid().is_err());
}

// ── Status derivation ───────────────────────────────────────────────

#[test]
fn unknown_container_is_not_found() {
    let h = Harness::new();
    let c = h.container("ghost");
    assert!(matches!(c.status(), Err(CorralError::NotFound { .. })));
    assert!(matches!(h.load("ghost"), Err(CorralError::NotFound { .. })));
}

#[test]
fn reused_pid_reads_as_stopped() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();

    h.platform.reuse_pid(p.pid().unwrap());
    assert_eq!(c.status().unwrap(), Status::Stopped);
    assert!(c.oci_state().unwrap().pid.is_none());
}

#[test]
fn freezer_state_maps_to_status() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();
    let cgroup = Harness::cgroup("web");

    h.platform.set_freeze(&cgroup, FreezeState::Freezing);
    assert_eq!(c.status().unwrap(), Status::Pausing);
    h.platform.set_freeze(&cgroup, FreezeState::Frozen);
    assert_eq!(c.status().unwrap(), Status::Paused);
}

#[test]
fn another_invocation_observes_the_same_container() {
    let h = Harness::new();
    let first = h.container("web");
    first.run(&mut init()).unwrap();

    let second = h.load("web").unwrap();
    assert_eq!(second.status().unwrap(), Status::Created);
    second.exec().unwrap();
    assert_eq!(first.status().unwrap(), Status::Running);
    assert!(second.tracked_processes().is_empty());
}

// ── Wait / signal ───────────────────────────────────────────────────

#[test]
fn unbound_descriptor_is_invalid_every_time() {
    let p = Process::new(vec!["true".into()]);
    for _ in 0..2 {
        assert!(matches!(p.wait(), Err(CorralError::InvalidProcess)));
        assert!(matches!(p.pid(), Err(CorralError::InvalidProcess)));
        assert!(matches!(
            p.signal(Signal::SIGTERM),
            Err(CorralError::InvalidProcess)
        ));
    }
    assert_eq!(p.pid_or_sentinel(), UNBOUND_PID);
}

#[test]
fn wait_is_idempotent_and_blocks_further_signals() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();

    h.platform.exit(p.pid().unwrap(), 3);
    assert_eq!(p.wait().unwrap(), ExitStatus::Exited(3));
    assert_eq!(p.wait().unwrap(), ExitStatus::Exited(3));
    assert!(matches!(
        p.signal(Signal::SIGTERM),
        Err(CorralError::ProcessExited { .. })
    ));
    assert!(c.tracked_processes().is_empty());
}

#[test]
fn signal_from_another_thread_ends_a_blocked_wait() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();

    let status = std::thread::scope(|s| {
        let waiter = s.spawn(|| p.wait());
        std::thread::sleep(Duration::from_millis(20));
        p.signal(Signal::SIGKILL).unwrap();
        waiter.join().unwrap()
    });
    assert_eq!(status.unwrap(), ExitStatus::Signaled(Signal::SIGKILL));
}

#[test]
fn waiting_on_init_removes_the_handshake() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.run(&mut p).unwrap();
    let fifo = h.runtime.container_dir(c.id()).join("exec.fifo");
    assert!(fifo.exists());

    h.platform.exit(p.pid().unwrap(), 0);
    let _ = p.wait().unwrap();
    assert!(!fifo.exists());
}

#[test]
fn signalling_a_stopped_init_is_invalid_state() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();
    h.platform.reuse_pid(p.pid().unwrap());

    assert!(matches!(
        c.signal(Signal::SIGTERM, false),
        Err(CorralError::InvalidState { .. })
    ));
    assert!(h.platform.signals().is_empty());
}

#[test]
fn broadcast_signal_reports_exactly_the_failed_pids() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();
    let cgroup = Harness::cgroup("web");
    let ok = h.platform.add_stray(&cgroup);
    let refused = h.platform.add_stray(&cgroup);
    h.platform.refuse_signals_to(refused);

    match c.signal(Signal::SIGUSR1, true) {
        Err(CorralError::PartialSignal {
            delivered,
            failures,
        }) => {
            assert_eq!(delivered, 2);
            let failed: Vec<i32> = failures.iter().map(|f| f.pid).collect();
            assert_eq!(failed, vec![refused]);
            assert_eq!(failures[0].source.raw_os_error(), Some(libc::ESRCH));
        }
        other => panic!("unexpected {other:?}"),
    }
    let delivered: Vec<i32> = h.platform.signals().into_iter().map(|(pid, _)| pid).collect();
    assert_eq!(delivered, vec![p.pid().unwrap(), ok]);
}

#[test]
fn broadcast_signal_succeeds_when_all_deliveries_do() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();
    let _ = h.platform.add_stray(&Harness::cgroup("web"));

    c.signal(Signal::SIGHUP, true).unwrap();
    assert_eq!(h.platform.signals().len(), 2);
}

// ── Exec handles ────────────────────────────────────────────────────

#[test]
fn additional_process_requires_running_container() {
    let h = Harness::new();
    let c = h.container("web");
    c.run(&mut init()).unwrap();

    let mut extra = Process::new(vec!["ps".into()]);
    match c.start(&mut extra) {
        Err(CorralError::InvalidState { status, .. }) => assert_eq!(status, "created"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!extra.is_bound());
}

#[test]
fn additional_process_joins_and_is_reaped() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();

    let mut extra = Process::new(vec!["ps".into()]);
    c.start(&mut extra).unwrap();
    let pid = extra.pid().unwrap();
    assert!(c.processes().unwrap().contains(&pid));
    assert_eq!(c.tracked_processes().len(), 2);

    h.platform.exit(pid, 0);
    assert!(extra.wait().unwrap().success());
    assert_eq!(c.tracked_processes(), vec![p.pid().unwrap()]);
    assert_eq!(c.status().unwrap(), Status::Running);
}

#[test]
fn dropped_or_vanished_processes_are_not_tracked() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();

    let mut dropped = Process::new(vec!["ps".into()]);
    c.start(&mut dropped).unwrap();
    let dropped_pid = dropped.pid().unwrap();
    assert!(c.tracked_processes().contains(&dropped_pid));
    drop(dropped);
    assert!(!c.tracked_processes().contains(&dropped_pid));

    let mut gone = Process::new(vec!["ps".into()]);
    c.start(&mut gone).unwrap();
    h.platform.exit(gone.pid().unwrap(), 0);
    assert_eq!(c.tracked_processes(), vec![p.pid().unwrap()]);
}

#[test]
fn run_with_non_init_descriptor_joins() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();

    let mut extra = Process::new(vec!["true".into()]);
    c.run(&mut extra).unwrap();
    assert!(extra.is_bound());
}

#[test]
fn foreign_sub_cgroup_controller_is_rejected() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();

    let mut extra = Process::new(vec!["true".into()]);
    let _ = extra.sub_cgroup_paths.insert("cpu".into(), "x".into());
    assert!(matches!(c.start(&mut extra), Err(CorralError::Config { .. })));
}

// ── Pause / resume ──────────────────────────────────────────────────

#[test]
fn pause_and_resume_round_trip() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();

    c.pause().unwrap();
    assert_eq!(c.status().unwrap(), Status::Paused);
    assert!(matches!(c.pause(), Err(CorralError::InvalidState { .. })));

    c.resume().unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);
    assert!(matches!(c.resume(), Err(CorralError::InvalidState { .. })));
}

// ── Destroy ─────────────────────────────────────────────────────────

#[test]
fn destroy_refuses_live_containers_and_keeps_record() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();
    let before = c.record().unwrap();

    assert!(matches!(c.destroy(), Err(CorralError::InvalidState { .. })));
    c.pause().unwrap();
    assert!(matches!(c.destroy(), Err(CorralError::InvalidState { .. })));
    assert_eq!(c.record().unwrap(), before);
}

#[test]
fn destroy_refuses_while_cgroup_has_processes() {
    let h = Harness::new();
    let c = h.container("web");
    let mut p = init();
    c.start(&mut p).unwrap();
    let stray = h.platform.add_stray(&Harness::cgroup("web"));

    p.signal(Signal::SIGKILL).unwrap();
    let _ = p.wait().unwrap();
    match c.destroy() {
        Err(CorralError::Busy { pids, .. }) => assert_eq!(pids, vec![stray]),
        other => panic!("unexpected {other:?}"),
    }
    assert!(c.record().is_ok());
}

#[test]
fn sleep_scenario_from_create_to_destroy() {
    let h = Harness::new();
    let c = h.container_with("sleeper", Harness::shared_pid_namespace());
    let mut p = init();

    c.run(&mut p).unwrap();
    assert_eq!(c.status().unwrap(), Status::Created);
    c.exec().unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);

    p.signal(Signal::SIGTERM).unwrap();
    assert_eq!(p.wait().unwrap(), ExitStatus::Signaled(Signal::SIGTERM));
    assert_eq!(c.status().unwrap(), Status::Stopped);

    c.destroy().unwrap();
    assert!(matches!(c.status(), Err(CorralError::NotFound { .. })));
    assert!(!h.platform.has_cgroup(&Harness::cgroup("sleeper")));
    assert!(!h.runtime.container_dir(c.id()).exists());
    c.destroy().unwrap();
}

#[test]
fn pid_namespace_init_survives_sigterm_but_not_sigkill() {
    let h = Harness::new();
    let c = h.container("sleeper");
    let mut p = init();
    c.start(&mut p).unwrap();

    c.signal(Signal::SIGTERM, false).unwrap();
    assert_eq!(c.status().unwrap(), Status::Running);

    c.signal(Signal::SIGKILL, false).unwrap();
    assert_eq!(p.wait().unwrap(), ExitStatus::Signaled(Signal::SIGKILL));
    assert_eq!(c.status().unwrap(), Status::Stopped);
    c.destroy().unwrap();
}

// ── Set / stats ─────────────────────────────────────────────────────

fn limits(pids_max: u64) -> ContainerConfig {
    ContainerConfig {
        resources: ResourceLimits {
            pids_max: Some(pids_max),
            ..ResourceLimits::default()
        },
        ..ContainerConfig::default()
    }
}

#[test]
fn set_applies_and_persists_new_limits() {
    let h = Harness::new();
    let c = h.container_with("web", limits(10));
    c.start(&mut init()).unwrap();

    c.set(limits(20)).unwrap();
    assert_eq!(c.record().unwrap().config.resources.pids_max, Some(20));
    assert_eq!(c.config().unwrap().resources.pids_max, Some(20));
    assert_eq!(h.platform.applied().last().unwrap().pids_max, Some(20));
}

#[test]
fn invalid_limits_are_rejected_without_writes() {
    let h = Harness::new();
    let c = h.container_with("web", limits(10));
    c.start(&mut init()).unwrap();

    assert!(matches!(
        c.set(limits(0)),
        Err(CorralError::ConfigRejected { .. })
    ));
    assert!(h.platform.applied().is_empty());
    assert_eq!(c.record().unwrap().config.resources.pids_max, Some(10));
}

#[test]
fn failed_apply_restores_previous_limits() {
    let h = Harness::new();
    let c = h.container_with("web", limits(10));
    c.start(&mut init()).unwrap();
    h.platform.fail_next_apply();

    assert!(matches!(
        c.set(limits(20)),
        Err(CorralError::ConfigRejected { .. })
    ));
    assert_eq!(h.platform.applied(), vec![limits(10).resources]);
    assert_eq!(c.record().unwrap().config.resources.pids_max, Some(10));
}

#[test]
fn set_keeps_everything_but_resources() {
    let h = Harness::new();
    let mut config = limits(10);
    config.bundle = "/bundles/web".into();
    let _ = config.annotations.insert("owner".into(), "ops".into());
    let c = h.container_with("web", config);
    c.start(&mut init()).unwrap();

    let mut update = limits(20);
    update.namespaces.pid = false;
    update.cgroup_path = Some("elsewhere".into());
    c.set(update).unwrap();

    let recorded = c.record().unwrap().config;
    assert_eq!(recorded.resources.pids_max, Some(20));
    assert_eq!(recorded.bundle, std::path::Path::new("/bundles/web"));
    assert_eq!(recorded.annotations.get("owner").map(String::as_str), Some("ops"));
    assert!(recorded.namespaces.pid);
    assert_eq!(recorded.cgroup_path, None);
    assert_eq!(
        c.oci_state().unwrap().bundle,
        std::path::Path::new("/bundles/web")
    );
}

#[test]
fn config_reflects_updates_from_another_invocation() {
    let h = Harness::new();
    let c = h.container_with("web", limits(10));
    c.start(&mut init()).unwrap();

    h.load("web").unwrap().set(limits(30)).unwrap();
    assert_eq!(c.config().unwrap().resources.pids_max, Some(30));
}

#[test]
fn stats_report_cgroup_counters() {
    let h = Harness::new();
    let c = h.container("web");
    c.start(&mut init()).unwrap();
    let _ = h.platform.add_stray(&Harness::cgroup("web"));

    let stats = c.stats().unwrap();
    assert_eq!(stats.container_id.as_str(), "web");
    assert_eq!(stats.pids, 2);
}
