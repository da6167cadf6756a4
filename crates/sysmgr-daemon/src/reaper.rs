//! Signal handling: child exits and shutdown requests become loop events.
//!
//! The signal streams only wake tasks; the actual reaping (`try_wait` on
//! each native child) happens on the session loop.

use std::io;

use sysmgr_core::event::{EventSink, LoopEvent};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info};

/// Installs the SIGCHLD stream. Must be called before any child is spawned.
pub fn child_exits() -> io::Result<Signal> {
    signal(SignalKind::child())
}

/// Forwards every SIGCHLD as `ChildExited` until the loop stops.
pub async fn forward_child_exits(mut sigchld: Signal, sink: EventSink) {
    while sigchld.recv().await.is_some() {
        debug!("SIGCHLD");
        if !sink.send(LoopEvent::ChildExited) {
            break;
        }
    }
}

/// Waits for SIGTERM or SIGINT and requests a shutdown.
pub async fn forward_shutdown(sink: EventSink) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    sink.send(LoopEvent::Shutdown);
    Ok(())
}
