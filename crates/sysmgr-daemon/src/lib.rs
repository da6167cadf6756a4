//! sysmgr-daemon - the OS-facing half of the session manager.
//!
//! Everything here turns something outside the process into a
//! [`LoopEvent`](sysmgr_core::event::LoopEvent) or carries a call from the
//! session loop to another process:
//!
//! ```text
//!   inotify (markers, compositor) ---+
//!   /proc/meminfo poller ------------+
//!   SIGCHLD / SIGTERM / SIGINT ------+--> EventSink --> Session
//!   web runtime socket (events) -----+
//!   control socket (requests) -------+
//!
//!   Session --> DelegateClient --> web runtime socket
//!   Session --> BusClient ------> <bus_dir>/<service>.sock
//! ```

pub mod bus;
pub mod delegate;
pub mod line;
pub mod pressure;
pub mod reaper;
pub mod server;
pub mod watch;
