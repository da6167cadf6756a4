//! Boot phase publication.
//!
//! Delivery is at-most-once per publish: a subscriber that connects later
//! sees only future changes (the current phase is part of the `getStatus`
//! reply instead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::boot::BootPhase;

/// Status document pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootStatus {
    /// Current phase.
    pub state: BootPhase,
}

/// Fans the current boot phase out to subscribers.
#[derive(Debug)]
pub struct StatusPublisher {
    current: BootPhase,
    tx: broadcast::Sender<BootStatus>,
}

impl StatusPublisher {
    /// Default number of undelivered updates kept per subscriber.
    pub const DEFAULT_CAPACITY: usize = 16;

    /// Creates a publisher starting in `Startup`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            current: BootPhase::Startup,
            tx,
        }
    }

    /// Records and pushes a phase. Returns how many subscribers received it.
    pub fn publish(&mut self, phase: BootPhase) -> usize {
        self.current = phase;
        let delivered = self.tx.send(BootStatus { state: phase }).unwrap_or(0);
        debug!(%phase, delivered, "boot status published");
        delivered
    }

    /// Last published status.
    #[must_use]
    pub const fn current(&self) -> BootStatus {
        BootStatus {
            state: self.current,
        }
    }

    /// Subscribes to future publishes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BootStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&BootStatus {
            state: BootPhase::FirstUse,
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"firstuse"}"#);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut publisher = StatusPublisher::default();
        assert_eq!(publisher.publish(BootPhase::Normal), 0);
        assert_eq!(publisher.current().state, BootPhase::Normal);
    }

    #[test]
    fn test_late_subscriber_sees_only_future() {
        let mut publisher = StatusPublisher::default();
        let mut early = publisher.subscribe();
        publisher.publish(BootPhase::FirstUse);

        let mut late = publisher.subscribe();
        publisher.publish(BootPhase::Normal);

        assert_eq!(early.try_recv().unwrap().state, BootPhase::FirstUse);
        assert_eq!(early.try_recv().unwrap().state, BootPhase::Normal);
        assert_eq!(late.try_recv().unwrap().state, BootPhase::Normal);
        assert!(late.try_recv().is_err());
    }
}
