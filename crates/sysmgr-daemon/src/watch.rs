//! inotify watchers for the preferences directory and the compositor socket.
//!
//! Each watcher runs on its own thread, blocked in `read_events`, and only
//! talks to the session through the [`EventSink`]. A watcher exits when the
//! session loop has stopped.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use sysmgr_core::boot::BootEvent;
use sysmgr_core::event::{EventSink, LoopEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure to set up a watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The inotify instance could not be created.
    #[error("inotify init failed")]
    Init(#[source] nix::Error),

    /// The directory could not be watched.
    #[error("failed to watch {}", path.display())]
    AddWatch {
        /// Watched directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: nix::Error,
    },

    /// The directory could not be created.
    #[error("failed to create {}", path.display())]
    CreateDir {
        /// Directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The watcher thread could not be started.
    #[error("failed to start watcher thread")]
    Spawn(#[source] std::io::Error),
}

fn watch_dir(dir: &Path, mask: AddWatchFlags) -> Result<Inotify, WatchError> {
    std::fs::create_dir_all(dir).map_err(|source| WatchError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let inotify = Inotify::init(InitFlags::IN_CLOEXEC).map_err(WatchError::Init)?;
    inotify
        .add_watch(dir, mask)
        .map_err(|source| WatchError::AddWatch {
            path: dir.to_path_buf(),
            source,
        })?;
    Ok(inotify)
}

/// Emits `MarkersChanged` whenever anything in `dir` is created, written,
/// removed or renamed.
pub fn spawn_marker_watch(dir: &Path, sink: EventSink) -> Result<JoinHandle<()>, WatchError> {
    let mask = AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_CLOSE_WRITE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO;
    let inotify = watch_dir(dir, mask)?;
    info!(dir = %dir.display(), "watching preference markers");

    std::thread::Builder::new()
        .name("marker-watch".to_string())
        .spawn(move || {
            loop {
                match inotify.read_events() {
                    Ok(events) if events.is_empty() => {},
                    Ok(_) => {
                        if !sink.send(LoopEvent::MarkersChanged) {
                            return;
                        }
                    },
                    Err(error) => {
                        warn!(%error, "marker watch stopped");
                        return;
                    },
                }
            }
        })
        .map_err(WatchError::Spawn)
}

/// What a directory event means for the compositor socket.
fn compositor_change(mask: AddWatchFlags) -> Option<bool> {
    if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
        Some(true)
    } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
        Some(false)
    } else {
        None
    }
}

fn compositor_event(available: bool) -> LoopEvent {
    if available {
        LoopEvent::Boot(BootEvent::CompositorAvailable)
    } else {
        LoopEvent::Boot(BootEvent::CompositorUnavailable)
    }
}

/// Reports the compositor socket `<runtime_dir>/<socket_name>` appearing and
/// disappearing. The current state is reported once at start.
pub fn spawn_compositor_watch(
    runtime_dir: &Path,
    socket_name: &OsStr,
    sink: EventSink,
) -> Result<JoinHandle<()>, WatchError> {
    let mask = AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO;
    let inotify = watch_dir(runtime_dir, mask)?;
    let socket_path = runtime_dir.join(socket_name);
    let socket_name: OsString = socket_name.to_os_string();

    let mut available = socket_path.exists();
    info!(socket = %socket_path.display(), available, "watching compositor socket");
    if available {
        sink.send(compositor_event(true));
    }

    std::thread::Builder::new()
        .name("compositor-watch".to_string())
        .spawn(move || {
            loop {
                let events = match inotify.read_events() {
                    Ok(events) => events,
                    Err(error) => {
                        warn!(%error, "compositor watch stopped");
                        return;
                    },
                };

                for event in events {
                    let now = if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                        Some(socket_path.exists())
                    } else if event.name.as_deref() == Some(socket_name.as_os_str()) {
                        compositor_change(event.mask)
                    } else {
                        None
                    };

                    match now {
                        Some(state) if state != available => {
                            available = state;
                            debug!(available, "compositor socket changed");
                            if !sink.send(compositor_event(available)) {
                                return;
                            }
                        },
                        _ => {},
                    }
                }
            }
        })
        .map_err(WatchError::Spawn)
}
