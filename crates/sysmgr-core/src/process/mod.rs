//! Application process supervision.
//!
//! ```text
//!  launch(app_id)
//!     |
//!     +-- tracked?  --------------------------> relaunch, same ProcessId
//!     +-- descriptor missing / locked --------> NotFound / Locked
//!     +-- Web   --> delegate.launch_web (async) -> WebLaunchFinished
//!     +-- Native --> admit? --> spawn --> Registry + MemoryQuota
//!
//!  kill(app_id | process_id)
//!     +-- Native --> SIGTERM --(grace)--> EscalationDue --> SIGKILL
//!     +-- Web    --> delegate.kill_web
//! ```
//!
//! [`ProcessId`]s are assigned by the supervisor and never reused, so an
//! exit notification for an old instance can never remove a newer one.

mod exit;
mod registry;
pub mod spawner;
mod supervisor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use exit::ExitKind;
pub use registry::Registry;
pub use spawner::{LaunchSpec, OsLauncher, OsProcess, ProcessLauncher, ProcessSignal};
pub use supervisor::{MAX_PROCESS_ID, ProcessSupervisor, SupervisorParts};

pub use crate::app::AppKind;
use crate::error::ErrorKind;
use crate::memory::SystemMemoryState;

/// Supervisor-assigned process identifier.
///
/// Decoupled from the OS pid so that web applications, which have no local
/// process, are tracked the same way as native ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tracked application instance.
#[derive(Debug)]
pub struct ApplicationProcess {
    app_id: String,
    process_id: ProcessId,
    kind: AppKind,
    os_handle: Option<Box<dyn OsProcess>>,
    started_at: DateTime<Utc>,
    terminating: bool,
    suspended: bool,
}

impl ApplicationProcess {
    /// A native instance owning its OS process.
    #[must_use]
    pub fn native(app_id: String, process_id: ProcessId, handle: Box<dyn OsProcess>) -> Self {
        Self {
            app_id,
            process_id,
            kind: AppKind::Native,
            os_handle: Some(handle),
            started_at: Utc::now(),
            terminating: false,
            suspended: false,
        }
    }

    /// A web instance hosted by the delegate.
    #[must_use]
    pub fn web(app_id: String, process_id: ProcessId) -> Self {
        Self {
            app_id,
            process_id,
            kind: AppKind::Web,
            os_handle: None,
            started_at: Utc::now(),
            terminating: false,
            suspended: false,
        }
    }

    /// Application id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Supervisor process id.
    #[must_use]
    pub const fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Execution kind.
    #[must_use]
    pub const fn kind(&self) -> AppKind {
        self.kind
    }

    /// OS pid of a native instance.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.os_handle.as_ref().map(|handle| handle.pid())
    }

    /// When the instance was recorded.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether a graceful termination was already requested.
    #[must_use]
    pub const fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub(crate) const fn mark_terminating(&mut self) {
        self.terminating = true;
    }

    /// Whether the process is stopped with SIGSTOP.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) const fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub(crate) fn os_handle_mut(&mut self) -> Option<&mut (dyn OsProcess + 'static)> {
        self.os_handle.as_deref_mut()
    }

    /// Serializable view of this instance.
    #[must_use]
    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            app_id: self.app_id.clone(),
            process_id: self.process_id,
            kind: self.kind,
            pid: self.pid(),
            started_at: self.started_at,
            suspended: self.suspended,
        }
    }
}

/// Snapshot of one running application, as reported by `listRunning`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    /// Application id.
    pub app_id: String,
    /// Supervisor process id.
    pub process_id: ProcessId,
    /// Execution kind.
    pub kind: AppKind,
    /// OS pid for native applications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the supervisor started tracking it.
    pub started_at: DateTime<Utc>,
    /// Stopped by a suspend request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suspended: bool,
}

/// OS-level process errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to deliver a signal.
    #[error("failed to signal pid {pid}: {source}")]
    SignalFailed {
        /// Target pid.
        pid: u32,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },

    /// Failed to query exit status.
    #[error("failed to wait for pid {pid}: {source}")]
    WaitFailed {
        /// Target pid.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by launch and kill requests.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No descriptor exists for the application.
    #[error("application '{app_id}' not found")]
    NotFound {
        /// Requested application.
        app_id: String,
    },

    /// The kill target is not running.
    #[error("'{target}' is not running")]
    NotRunning {
        /// Requested application id or process id.
        target: String,
    },

    /// The descriptor is locked against execution.
    #[error("application '{app_id}' is locked")]
    Locked {
        /// Requested application.
        app_id: String,
    },

    /// Memory admission control refused the launch.
    #[error("not enough memory to launch '{app_id}' ({required_mb} MB required, memory state {state})")]
    AdmissionRefused {
        /// Requested application.
        app_id: String,
        /// Declared requirement.
        required_mb: u64,
        /// State at the time of the refusal.
        state: SystemMemoryState,
    },

    /// The OS failed to create the process.
    #[error("failed to launch '{app_id}': {reason}")]
    LaunchFailed {
        /// Requested application.
        app_id: String,
        /// OS error text.
        reason: String,
    },

    /// Web launch requested while the web runtime is disconnected.
    #[error("web runtime unavailable, cannot launch '{app_id}'")]
    DelegateUnavailable {
        /// Requested application or URL.
        app_id: String,
    },

    /// A suspend or resume signal failed.
    #[error("failed to signal '{app_id}': {source}")]
    SignalFailed {
        /// Target application.
        app_id: String,
        /// Underlying process error.
        #[source]
        source: ProcessError,
    },
}

impl SupervisorError {
    /// Classification reported to clients.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::NotRunning { .. } => ErrorKind::ResourceNotFound,
            Self::Locked { .. } => ErrorKind::PermissionDenied,
            Self::AdmissionRefused { .. } => ErrorKind::AdmissionRefused,
            Self::LaunchFailed { .. } => ErrorKind::LaunchFailure,
            Self::DelegateUnavailable { .. } => ErrorKind::TransportFailure,
            Self::SignalFailed { .. } => ErrorKind::SignalFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let refused = SupervisorError::AdmissionRefused {
            app_id: "a".to_string(),
            required_mb: 10,
            state: SystemMemoryState::Low,
        };
        assert_eq!(refused.kind(), ErrorKind::AdmissionRefused);
        assert!(refused.to_string().contains("memory state low"));

        let locked = SupervisorError::Locked {
            app_id: "a".to_string(),
        };
        assert_eq!(locked.kind(), ErrorKind::PermissionDenied);

        let missing = SupervisorError::NotRunning {
            target: "7".to_string(),
        };
        assert_eq!(missing.kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_web_process_has_no_pid() {
        let process = ApplicationProcess::web("com.example.mail".to_string(), ProcessId::new(4));
        assert_eq!(process.pid(), None);
        let summary = process.summary();
        assert_eq!(summary.kind, AppKind::Web);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["processId"], 4);
        assert_eq!(json["appId"], "com.example.mail");
        assert!(json.get("pid").is_none());
        assert!(json.get("suspended").is_none());
    }
}
