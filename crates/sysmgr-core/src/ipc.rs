//! Wire messages for the control socket, the web runtime connection and
//! the session bus.
//!
//! Every transport here is JSON lines over a Unix socket: one JSON document
//! per line, no length prefix. Lines longer than [`MAX_LINE_BYTES`] are a
//! protocol error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::boot::BootPhase;
use crate::delegate::{CacheScope, UrlLaunchRequest, WebAppEntry, WebLaunchRequest, WindowType};
use crate::error::{ErrorKind, TransportError};
use crate::process::{ProcessId, ProcessSummary, SupervisorError};
use crate::status::BootStatus;

/// Upper bound for one encoded message.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Serializes `message` followed by a newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    let mut line = serde_json::to_vec(message)?;
    if line.len() >= MAX_LINE_BYTES {
        return Err(TransportError::protocol(format!(
            "message of {} bytes exceeds line limit",
            line.len()
        )));
    }
    line.push(b'\n');
    Ok(line)
}

fn check_line(line: &[u8]) -> Result<&[u8], TransportError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(TransportError::protocol(format!(
            "line of {} bytes exceeds limit",
            line.len()
        )));
    }
    Ok(line.trim_ascii())
}

// =============================================================================
// Control socket
// =============================================================================

/// Request from a control socket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlRequest {
    /// Current boot phase, optionally followed by one push per change.
    GetStatus {
        /// Keep the connection open for updates.
        #[serde(default)]
        subscribe: bool,
    },

    /// Launch (or relaunch) an application.
    Launch {
        /// Application id.
        app_id: String,
        /// Launch parameters; strings pass through, anything else is
        /// forwarded as its JSON text.
        #[serde(default)]
        params: Value,
    },

    /// Terminate an application.
    KillApp {
        /// Application id.
        app_id: String,
    },

    /// Stop a native application with SIGSTOP.
    SuspendApp {
        /// Application id.
        app_id: String,
    },

    /// Continue a suspended native application.
    ResumeApp {
        /// Application id.
        app_id: String,
    },

    /// Open a URL in the web runtime.
    LaunchUrl {
        /// Document to open.
        url: String,
        /// Window to open it in.
        #[serde(default)]
        window_type: WindowType,
        /// Launch parameters, as for `launch`.
        #[serde(default)]
        params: Value,
    },

    /// List running applications.
    ListRunning,
}

impl ControlRequest {
    /// Parses one request line.
    pub fn parse(line: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(check_line(line)?)?)
    }
}

/// Converts launch parameters to the string form handed to the supervisor.
#[must_use]
pub fn params_to_string(params: &Value) -> String {
    match params {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Reply to a control request, and the shape of status pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReply {
    /// Whether the request succeeded.
    pub return_value: bool,
    /// Boot phase, for status replies and pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BootPhase>,
    /// Whether a status subscription was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
    /// Process id of a launched application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
    /// Running applications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<Vec<ProcessSummary>>,
    /// Failure category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,
    /// Human-readable failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ControlReply {
    /// Bare success.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            return_value: true,
            ..Self::default()
        }
    }

    /// Reply to `getStatus`.
    #[must_use]
    pub fn status(status: BootStatus, subscribed: bool) -> Self {
        Self {
            state: Some(status.state),
            subscribed: Some(subscribed),
            ..Self::ok()
        }
    }

    /// Subscription push.
    #[must_use]
    pub fn update(status: BootStatus) -> Self {
        Self {
            state: Some(status.state),
            ..Self::ok()
        }
    }

    /// Reply to a successful `launch`.
    #[must_use]
    pub fn launched(process_id: ProcessId) -> Self {
        Self {
            process_id: Some(process_id),
            ..Self::ok()
        }
    }

    /// Reply to `listRunning`.
    #[must_use]
    pub fn running(running: Vec<ProcessSummary>) -> Self {
        Self {
            running: Some(running),
            ..Self::ok()
        }
    }

    /// Failure reply.
    #[must_use]
    pub fn error(code: ErrorKind, text: impl Into<String>) -> Self {
        Self {
            return_value: false,
            error_code: Some(code),
            error_text: Some(text.into()),
            ..Self::default()
        }
    }
}

impl From<&SupervisorError> for ControlReply {
    fn from(error: &SupervisorError) -> Self {
        Self::error(error.kind(), error.to_string())
    }
}

// =============================================================================
// Web runtime connection
// =============================================================================

/// Request sent to the web runtime. The runtime echoes `token` in its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRequest {
    /// Correlation token.
    pub token: u64,
    /// The call itself.
    #[serde(flatten)]
    pub call: DelegateCall,
}

/// Calls understood by the web runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DelegateCall {
    /// Start a web application under a supervisor-allocated process id.
    LaunchApp(WebLaunchRequest),
    /// Close the application with this process id.
    KillApp {
        /// Target process.
        process_id: ProcessId,
    },
    /// Hand new parameters to a running application.
    Relaunch {
        /// Target application.
        app_id: String,
        /// Launch parameters.
        params: String,
    },
    /// Snapshot of running applications.
    ListRunningApps,
    /// Subscribe to start / close events for this connection.
    RegisterForAppEvents,
    /// Open a URL in a new window.
    LaunchUrl(UrlLaunchRequest),
    /// Drop memory caches. With neither field set, every cache is dropped.
    ClearMemoryCaches {
        /// Limit to one instance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_id: Option<ProcessId>,
        /// Limit to one application.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
}

impl DelegateCall {
    /// Method name on the wire, for logging.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::LaunchApp(_) => "launchApp",
            Self::KillApp { .. } => "killApp",
            Self::Relaunch { .. } => "relaunch",
            Self::ListRunningApps => "listRunningApps",
            Self::RegisterForAppEvents => "registerForAppEvents",
            Self::LaunchUrl(_) => "launchUrl",
            Self::ClearMemoryCaches { .. } => "clearMemoryCaches",
        }
    }
}

impl From<CacheScope> for DelegateCall {
    fn from(scope: CacheScope) -> Self {
        let (process_id, app_id) = match scope {
            CacheScope::All => (None, None),
            CacheScope::Process(process_id) => (Some(process_id), None),
            CacheScope::App(app_id) => (None, Some(app_id)),
        };
        Self::ClearMemoryCaches { process_id, app_id }
    }
}

/// Anything the web runtime sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelegateMessage {
    /// Unsolicited application event.
    Event(AppEvent),
    /// Reply to a request.
    Reply(DelegateReply),
}

/// Start / close notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    /// What happened.
    pub event: AppEventKind,
    /// Application id; close events may omit it.
    #[serde(default)]
    pub app_id: String,
    /// Runtime-reported process id.
    pub process_id: ProcessId,
}

/// Kind of [`AppEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEventKind {
    /// The application started.
    Start,
    /// The application closed.
    Close,
}

/// Reply to a [`DelegateRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateReply {
    /// Token of the request being answered.
    pub token: u64,
    /// Whether the call succeeded.
    pub return_value: bool,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    /// Running applications, for `listRunningApps`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<Vec<WebAppEntry>>,
}

impl DelegateReply {
    /// Turns a negative reply into [`TransportError::Rejected`].
    pub fn into_result(self) -> Result<Option<Vec<WebAppEntry>>, TransportError> {
        if self.return_value {
            Ok(self.apps)
        } else {
            Err(TransportError::Rejected {
                reason: self
                    .error_text
                    .unwrap_or_else(|| "request rejected".to_string()),
            })
        }
    }
}

/// Parses one line received from the web runtime.
pub fn parse_delegate_message(line: &[u8]) -> Result<DelegateMessage, TransportError> {
    Ok(serde_json::from_slice(check_line(line)?)?)
}

// =============================================================================
// Session bus
// =============================================================================

/// One-shot request to a bus service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRequest {
    /// Method on the service.
    pub method: String,
    /// Call payload.
    #[serde(default)]
    pub params: Value,
}

/// A bus service's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusReply {
    /// Whether the call succeeded.
    pub return_value: bool,
    /// Failure description.
    #[serde(default)]
    pub error_text: Option<String>,
}

impl BusReply {
    /// Parses a reply line, mapping `returnValue: false` to
    /// [`TransportError::Rejected`].
    pub fn parse(line: &[u8]) -> Result<(), TransportError> {
        let reply: Self = serde_json::from_slice(check_line(line)?)?;
        if reply.return_value {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                reason: reply
                    .error_text
                    .unwrap_or_else(|| "request rejected".to_string()),
            })
        }
    }
}
