//! # corral-core
//!
//! Low-level Linux isolation primitives for the Corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v2**: CPU, memory, I/O, and pids limits, the freezer, and
//!   usage counters.
//! - **Namespaces**: clone flags for new namespaces, `setns(2)` handles for
//!   joining existing ones, and user-namespace ID maps.
//! - **procfs**: pid start times for reuse-safe process identity, and
//!   signal delivery.
//! - **Capabilities**, **rlimits**, and **security attributes** applied
//!   between fork and exec.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod procfs;

#[cfg(target_os = "linux")]
pub mod namespace;
#[cfg(target_os = "linux")]
pub mod rlimit;
#[cfg(target_os = "linux")]
pub mod security;
