#![allow(clippy::doc_markdown)]

//! sysmgr-core - application lifecycle supervision for the session manager.
//!
//! The crate holds the three engines that bring a device from power-on to a
//! usable session and keep it there:
//!
//! - [`boot`]: the Startup / FirstUse / Normal phase machine.
//! - [`process`]: launching, relaunching and terminating native and web
//!   applications.
//! - [`memory`]: admission checks and per-process memory quotas.
//!
//! All three are driven from one cooperative event loop owned by
//! [`session::Session`]. Nothing in this crate locks: every state mutation
//! happens while handling a [`event::LoopEvent`], and slow work (outbound
//! calls, timers) is spawned and reports back as another event.
//!
//! ```text
//!   watchers / signals / delegate / control socket
//!                     |
//!                     v
//!              EventSink (mpsc)
//!                     |
//!                     v
//!   +------------------------------------------+
//!   | Session                                  |
//!   |   BootSequencer --(BootHost)--+          |
//!   |                               v          |
//!   |   ProcessSupervisor <-> MemoryAdmission  |
//!   |   StatusPublisher --> subscribers        |
//!   +------------------------------------------+
//! ```

pub mod app;
pub mod backoff;
pub mod boot;
pub mod config;
pub mod delegate;
pub mod error;
pub mod event;
pub mod ipc;
pub mod memory;
pub mod process;
pub mod services;
pub mod session;
pub mod status;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{ErrorKind, TransportError};
