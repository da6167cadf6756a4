//! Boot phase sequencing.
//!
//! ```text
//!            compositor + delegate ready
//!  Startup ------------------------------+--> FirstUse --(configurator done)--+
//!     ^        markers missing           |                                   |
//!     |                                  +--> Normal <-----------------------+
//!     |        both markers present           |
//!     +-------------------------------------- +
//!          compositor or delegate lost
//! ```
//!
//! The sequencer is a plain state machine. Every side effect (launching and
//! killing apps, the display lock, the suspend marker, outbound service
//! calls, status publication) goes through a [`BootHost`], so the machine
//! can be driven by the session loop in production and by a recording host
//! in tests.

mod markers;
mod sequencer;

use serde::{Deserialize, Serialize};

pub use markers::{MarkerFiles, SuspendMarker};
pub use sequencer::{BootPlan, BootSequencer};

/// Top-level lifecycle stage of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BootPhase {
    /// Waiting for the compositor and the web runtime.
    #[default]
    #[serde(rename = "startup")]
    Startup,
    /// The out-of-box experience is running.
    #[serde(rename = "firstuse")]
    FirstUse,
    /// Regular session.
    #[serde(rename = "normal")]
    Normal,
}

impl BootPhase {
    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::FirstUse => "firstuse",
            Self::Normal => "normal",
        }
    }
}

impl std::fmt::Display for BootPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootEvent {
    /// The "first run completed" marker is present.
    FirstUseDone,
    /// The "local profile created" marker appeared.
    ProfileCreated,
    /// The compositor socket appeared.
    CompositorAvailable,
    /// The compositor socket disappeared.
    CompositorUnavailable,
    /// The web runtime connected.
    DelegateAvailable,
    /// The web runtime disconnected.
    DelegateUnavailable,
}

impl std::fmt::Display for BootEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FirstUseDone => "first_use_done",
            Self::ProfileCreated => "profile_created",
            Self::CompositorAvailable => "compositor_available",
            Self::CompositorUnavailable => "compositor_unavailable",
            Self::DelegateAvailable => "delegate_available",
            Self::DelegateUnavailable => "delegate_unavailable",
        };
        f.write_str(name)
    }
}

/// Marker files consulted by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// First run completed.
    FirstUseDone,
    /// Local profile created.
    ProfileCreated,
}

/// Identifies the phase entry an asynchronous call was made from.
///
/// Completions carrying a ticket from an earlier entry are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTicket {
    epoch: u64,
}

impl CallTicket {
    pub(crate) const fn new(epoch: u64) -> Self {
        Self { epoch }
    }

    /// Phase entry counter the ticket was issued at.
    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.epoch
    }
}

/// Side effects available to the sequencer.
///
/// Every method must return promptly; calls that talk to other services are
/// expected to be spawned, with their completion fed back through
/// [`BootSequencer::on_account_created`] and
/// [`BootSequencer::on_configurator_finished`].
pub trait BootHost {
    /// Whether a marker file exists right now.
    fn marker_present(&self, marker: Marker) -> bool;

    /// Launches an application. Failures are logged by the host.
    fn launch_app(&mut self, app_id: &str);

    /// Kills an application. Failures are logged by the host.
    fn kill_app(&mut self, app_id: &str);

    /// Takes or releases the exclusive display-attention lock.
    fn set_display_lock(&mut self, held: bool);

    /// Creates or removes the suspend-allowed marker.
    fn set_suspend_allowed(&mut self, allowed: bool);

    /// Starts local account creation.
    fn create_local_account(&mut self, ticket: CallTicket);

    /// Starts the configurator.
    fn run_configurator(&mut self, ticket: CallTicket);

    /// Publishes the current phase to subscribers.
    fn publish_phase(&mut self, phase: BootPhase);

    /// Called after `phase` was left.
    fn phase_left(&mut self, _phase: BootPhase) {}

    /// Called before `phase` is entered.
    fn phase_entered(&mut self, _phase: BootPhase) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(
            serde_json::to_string(&BootPhase::FirstUse).unwrap(),
            "\"firstuse\""
        );
        let phase: BootPhase = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(phase, BootPhase::Normal);
        assert_eq!(BootPhase::Startup.to_string(), "startup");
    }
}
