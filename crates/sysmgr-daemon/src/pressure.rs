//! Memory pressure poller.

use std::path::PathBuf;
use std::time::Duration;

use sysmgr_core::event::{EventSink, LoopEvent};
use sysmgr_core::memory::{MemoryPressure, SystemMemoryState};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Default meminfo location.
pub const PROC_MEMINFO: &str = "/proc/meminfo";

/// Polls `meminfo` every `interval` and reports state changes until the
/// session loop stops. The session starts out assuming `Normal`.
pub async fn run_pressure_poller(
    pressure: MemoryPressure,
    meminfo: PathBuf,
    interval: Duration,
    sink: EventSink,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = SystemMemoryState::Normal;
    let mut read_failed = false;

    while !sink.is_closed() {
        ticker.tick().await;

        let state = match pressure.read(&meminfo) {
            Ok(state) => {
                read_failed = false;
                state
            },
            Err(error) => {
                if !read_failed {
                    warn!(path = %meminfo.display(), %error, "cannot read memory state");
                    read_failed = true;
                }
                continue;
            },
        };

        if state != last {
            info!(from = %last, to = %state, "system memory state changed");
            last = state;
            sink.send(LoopEvent::MemoryStateChanged(state));
        }
    }
}
