//! Memory admission control and quota enforcement.
//!
//! Two independent inputs feed this module:
//!
//! - the system memory state, pushed in by a pressure source (see
//!   [`pressure`]) and consulted by [`MemoryAdmissionControl::admit`];
//! - per-process quotas for native applications, sampled on a fixed tick by
//!   [`MemoryAdmissionControl::enforce`].
//!
//! Enforcement is pressure-gated: each over-budget sample below the violation
//! threshold is only logged. An over-budget sample taken once the threshold
//! is reached kills the process, provided the system is not in the `Normal`
//! state.
//!
//! While the state is not `Normal`, a second timer reports the state along
//! with the daemon's own memory usage (see
//! [`MemoryAdmissionControl::arm_report`]).

mod oom;
pub mod pressure;
mod sampler;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use oom::protect_from_oom_killer;
pub use pressure::MemoryPressure;
pub use sampler::{ProcStatusSampler, parse_status_mb};

use crate::config::MemoryConfig;
use crate::process::ProcessId;

/// System-wide memory state, ordered from least to most constrained.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SystemMemoryState {
    /// Plenty of memory.
    #[default]
    Normal,
    /// Getting tight.
    Medium,
    /// New native launches are refused from here on.
    Low,
    /// Near exhaustion.
    Critical,
}

impl SystemMemoryState {
    /// Returns the state as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for SystemMemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory budget of one native process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryQuota {
    /// Supervisor process id the quota belongs to.
    pub process_id: ProcessId,
    /// OS pid that is sampled.
    pub pid: u32,
    /// Budget in megabytes.
    pub max_memory_allowed_mb: u64,
    /// Consecutive over-budget samples, capped at the violation threshold.
    pub violation_count: u32,
}

/// Reads the resident plus swapped memory of a process.
pub trait MemorySampler: Send {
    /// Usage in megabytes, or `None` when the process no longer exists.
    fn sample_mb(&self, pid: u32) -> Option<u64>;
}

/// Admission decisions and quota enforcement.
pub struct MemoryAdmissionControl {
    state: SystemMemoryState,
    quotas: BTreeMap<ProcessId, MemoryQuota>,
    sampler: Box<dyn MemorySampler>,
    violation_threshold: u32,
    sample_interval: Duration,
    tick_armed: bool,
    report_interval: Duration,
    report_armed: bool,
}

impl std::fmt::Debug for MemoryAdmissionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdmissionControl")
            .field("state", &self.state)
            .field("quotas", &self.quotas)
            .field("violation_threshold", &self.violation_threshold)
            .field("tick_armed", &self.tick_armed)
            .field("report_armed", &self.report_armed)
            .finish_non_exhaustive()
    }
}

impl MemoryAdmissionControl {
    /// Creates the controller in the `Normal` state with no quotas.
    #[must_use]
    pub fn new(config: &MemoryConfig, sampler: Box<dyn MemorySampler>) -> Self {
        Self {
            state: SystemMemoryState::Normal,
            quotas: BTreeMap::new(),
            sampler,
            violation_threshold: config.violation_threshold.max(1),
            sample_interval: config.sample_interval,
            tick_armed: false,
            report_interval: config.report_interval,
            report_armed: false,
        }
    }

    /// Whether a native launch needing `required_mb` may proceed.
    ///
    /// Refuses everything once the state is `Low` or worse, whatever the
    /// requirement.
    #[must_use]
    pub fn admit(&self, required_mb: u64) -> bool {
        let admitted = self.state < SystemMemoryState::Low;
        if !admitted {
            debug!(state = %self.state, required_mb, "admission refused");
        }
        admitted
    }

    /// Current system memory state.
    #[must_use]
    pub const fn state(&self) -> SystemMemoryState {
        self.state
    }

    /// Records a new system memory state. Returns `true` if it changed.
    pub fn set_state(&mut self, state: SystemMemoryState) -> bool {
        if self.state == state {
            return false;
        }
        info!(from = %self.state, to = %state, "system memory state changed");
        self.state = state;
        true
    }

    /// Starts monitoring a native process. A zero budget is ignored.
    pub fn register_quota(&mut self, process_id: ProcessId, pid: u32, max_memory_allowed_mb: u64) {
        if max_memory_allowed_mb == 0 {
            return;
        }
        debug!(%process_id, pid, max_memory_allowed_mb, "memory quota registered");
        self.quotas.insert(
            process_id,
            MemoryQuota {
                process_id,
                pid,
                max_memory_allowed_mb,
                violation_count: 0,
            },
        );
    }

    /// Stops monitoring a process.
    pub fn unregister_quota(&mut self, process_id: ProcessId) -> Option<MemoryQuota> {
        let removed = self.quotas.remove(&process_id);
        if removed.is_some() {
            debug!(%process_id, "memory quota unregistered");
        }
        removed
    }

    /// Looks up the quota of a process.
    #[must_use]
    pub fn quota(&self, process_id: ProcessId) -> Option<&MemoryQuota> {
        self.quotas.get(&process_id)
    }

    /// Number of registered quotas.
    #[must_use]
    pub fn quota_count(&self) -> usize {
        self.quotas.len()
    }

    /// Returns the tick delay if a tick must be scheduled now: at least one
    /// quota is registered and no tick is pending. Marks the tick pending.
    pub fn arm_tick(&mut self) -> Option<Duration> {
        if self.tick_armed || self.quotas.is_empty() {
            return None;
        }
        self.tick_armed = true;
        Some(self.sample_interval)
    }

    /// Marks the pending tick as delivered.
    pub const fn tick_fired(&mut self) {
        self.tick_armed = false;
    }

    /// Returns the report delay if a low-memory report must be scheduled
    /// now: the state is not `Normal` and no report is pending. Marks the
    /// report pending.
    pub fn arm_report(&mut self) -> Option<Duration> {
        if self.report_armed || self.state == SystemMemoryState::Normal {
            return None;
        }
        self.report_armed = true;
        Some(self.report_interval)
    }

    /// Marks the pending report as delivered.
    pub const fn report_fired(&mut self) {
        self.report_armed = false;
    }

    /// Memory used by this daemon, in megabytes.
    #[must_use]
    pub fn own_usage_mb(&self) -> Option<u64> {
        self.sampler.sample_mb(std::process::id())
    }

    /// Samples every quota once.
    ///
    /// Returns the processes that must be killed. Their quotas are already
    /// removed. Vanished processes are dropped silently.
    pub fn enforce(&mut self) -> Vec<ProcessId> {
        let state = self.state;
        let threshold = self.violation_threshold;
        let sampler = &self.sampler;
        let mut kills = Vec::new();

        self.quotas.retain(|process_id, quota| {
            let Some(used_mb) = sampler.sample_mb(quota.pid) else {
                debug!(%process_id, pid = quota.pid, "monitored process is gone");
                return false;
            };

            if used_mb <= quota.max_memory_allowed_mb {
                quota.violation_count = 0;
                return true;
            }

            if quota.violation_count < threshold {
                quota.violation_count += 1;
                warn!(
                    %process_id,
                    pid = quota.pid,
                    used_mb,
                    max_mb = quota.max_memory_allowed_mb,
                    violations = quota.violation_count,
                    "process exceeds memory quota"
                );
                return true;
            }

            if state == SystemMemoryState::Normal {
                warn!(
                    %process_id,
                    pid = quota.pid,
                    used_mb,
                    max_mb = quota.max_memory_allowed_mb,
                    "process exceeds memory quota, system memory is normal so it is left running"
                );
                return true;
            }

            warn!(
                %process_id,
                pid = quota.pid,
                used_mb,
                max_mb = quota.max_memory_allowed_mb,
                %state,
                "process exceeds memory quota under memory pressure, killing"
            );
            kills.push(*process_id);
            false
        });

        kills
    }
}
