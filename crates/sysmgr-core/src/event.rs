//! Events consumed by the session loop, and the handle used to produce them.
//!
//! Anything that happens outside the loop (a timer firing, an outbound call
//! completing, a child exiting, a client asking for status) is turned into a
//! [`LoopEvent`] and sent through an [`EventSink`]. The loop handles one
//! event at a time, so engine state needs no locking.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::boot::{BootEvent, CallTicket};
use crate::delegate::{WebAppEntry, WindowType};
use crate::error::TransportError;
use crate::memory::SystemMemoryState;
use crate::process::{ProcessId, ProcessSummary, SupervisorError};
use crate::status::BootStatus;

/// Everything the session loop reacts to.
#[derive(Debug)]
pub enum LoopEvent {
    /// Compositor or delegate readiness change, or a marker event.
    Boot(BootEvent),

    /// Something changed in the preferences directory.
    MarkersChanged,

    /// Local account creation finished.
    AccountCreated {
        /// Ticket issued with the request.
        ticket: CallTicket,
        /// Outcome of the call.
        result: Result<(), TransportError>,
    },

    /// The configurator finished.
    ConfiguratorFinished {
        /// Ticket issued with the request.
        ticket: CallTicket,
        /// Outcome of the call.
        result: Result<(), TransportError>,
    },

    /// At least one child process changed state.
    ChildExited,

    /// Grace period of a graceful termination expired.
    EscalationDue {
        /// Process that was asked to exit.
        process_id: ProcessId,
    },

    /// Quota enforcement tick.
    QuotaTick,

    /// Periodic low-memory report while the state is not Normal.
    MemoryReportTick,

    /// The memory pressure source reported a new state.
    MemoryStateChanged(SystemMemoryState),

    /// The web runtime answered a launch request.
    WebLaunchFinished {
        /// Launched application.
        app_id: String,
        /// Process id allocated for the launch.
        process_id: ProcessId,
        /// Outcome of the call.
        result: Result<(), TransportError>,
    },

    /// The web runtime connection came up.
    DelegateConnected,

    /// The web runtime connection went away.
    DelegateDisconnected,

    /// Reply to the running-application query issued on connect.
    DelegateSnapshot {
        /// Connection epoch the query belongs to.
        epoch: u64,
        /// Running web applications.
        result: Result<Vec<WebAppEntry>, TransportError>,
    },

    /// The web runtime started an application.
    DelegateAppStarted {
        /// Application id.
        app_id: String,
        /// Process id reported by the runtime.
        process_id: ProcessId,
    },

    /// The web runtime closed an application.
    DelegateAppClosed {
        /// Process id reported by the runtime.
        process_id: ProcessId,
    },

    /// A control socket request.
    Control(ControlCommand),

    /// Stop the loop and terminate native children.
    Shutdown,
}

/// Requests from control socket clients, answered through a oneshot.
#[derive(Debug)]
pub enum ControlCommand {
    /// Current boot status, optionally with a subscription.
    Status {
        /// Also return a receiver for future changes.
        subscribe: bool,
        /// Reply channel.
        reply: oneshot::Sender<StatusReply>,
    },

    /// Launch an application.
    Launch {
        /// Application id.
        app_id: String,
        /// Launch parameters.
        params: String,
        /// Reply channel.
        reply: oneshot::Sender<Result<ProcessId, SupervisorError>>,
    },

    /// Kill an application.
    Kill {
        /// Application id.
        app_id: String,
        /// Reply channel.
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// Stop a native application.
    Suspend {
        /// Application id.
        app_id: String,
        /// Reply channel.
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// Continue a suspended native application.
    Resume {
        /// Application id.
        app_id: String,
        /// Reply channel.
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// Open a URL in the web runtime.
    LaunchUrl {
        /// Document to open.
        url: String,
        /// Window to open it in.
        window_type: WindowType,
        /// Launch parameters.
        params: String,
        /// Reply channel.
        reply: oneshot::Sender<Result<ProcessId, SupervisorError>>,
    },

    /// List running applications.
    ListRunning {
        /// Reply channel.
        reply: oneshot::Sender<Vec<ProcessSummary>>,
    },
}

/// Answer to [`ControlCommand::Status`].
#[derive(Debug)]
pub struct StatusReply {
    /// Current status.
    pub status: BootStatus,
    /// Future changes, if a subscription was requested.
    pub updates: Option<broadcast::Receiver<BootStatus>>,
}

/// Cloneable producer side of the session loop's queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl EventSink {
    /// Creates a sink and the receiver the loop drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an event. Returns `false` once the loop has stopped.
    ///
    /// Does not need a runtime, so watcher threads can call it.
    pub fn send(&self, event: LoopEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queues an event after `delay`.
    pub fn send_after(&self, delay: Duration, event: LoopEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    /// Runs `call` off the loop and delivers its output as the event built
    /// by `complete`.
    pub fn spawn_call<F, T, M>(&self, call: F, complete: M)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        M: FnOnce(T) -> LoopEvent + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let output = call.await;
            let _ = tx.send(complete(output));
        });
    }

    /// Runs a fire-and-forget call, logging failure.
    pub fn spawn_best_effort<F>(&self, operation: &'static str, call: F)
    where
        F: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(error) = call.await {
                warn!(operation, %error, "outbound call failed");
            }
        });
    }

    /// Whether the loop has stopped receiving.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
