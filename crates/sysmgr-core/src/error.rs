//! Error taxonomy shared by the engines and the outer surfaces.
//!
//! Every error that can reach a client of the control socket maps onto one
//! [`ErrorKind`]. Errors that stay inside the daemon (configuration, process
//! spawning) live next to the code that raises them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification reported to clients alongside an error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown application or process.
    ResourceNotFound,
    /// The application is locked against launching.
    PermissionDenied,
    /// Memory admission control refused the launch.
    AdmissionRefused,
    /// The OS or the web runtime failed to start the application.
    LaunchFailure,
    /// An external collaborator could not be reached or failed a call.
    TransportFailure,
    /// A suspend or resume signal could not be delivered.
    SignalFailure,
}

impl ErrorKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResourceNotFound => "resource_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::AdmissionRefused => "admission_refused",
            Self::LaunchFailure => "launch_failure",
            Self::TransportFailure => "transport_failure",
            Self::SignalFailure => "signal_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a call to an external collaborator (web runtime delegate,
/// account service, configurator, display manager, application catalog).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collaborator is not connected.
    #[error("service '{service}' is unavailable")]
    Unavailable {
        /// Name of the unreachable service.
        service: String,
    },

    /// Socket I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply arrived in time.
    #[error("call timed out")]
    Timeout,

    /// The collaborator answered with `returnValue: false`.
    #[error("call rejected: {reason}")]
    Rejected {
        /// Error text supplied by the collaborator.
        reason: String,
    },

    /// The collaborator sent something that is not valid protocol.
    #[error("protocol error: {reason}")]
    Protocol {
        /// What was wrong with the message.
        reason: String,
    },
}

impl TransportError {
    /// Convenience constructor for [`TransportError::Unavailable`].
    #[must_use]
    pub fn unavailable(service: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
        }
    }

    /// Convenience constructor for [`TransportError::Protocol`].
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        Self::protocol(error.to_string())
    }
}
