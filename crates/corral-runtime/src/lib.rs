//! Container lifecycle management for the Corral runtime.
//!
//! [`container::Container`] creates, observes, signals and destroys
//! containers whose state is shared with other runtime invocations through
//! durable records. Kernel access goes through [`backend::Platform`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod container;
#[cfg(target_os = "linux")]
mod exec;
pub mod handshake;
pub mod io;
pub mod metrics;
pub mod process;
pub mod state;

pub use container::Container;
pub use process::{ExitStatus, Process};
