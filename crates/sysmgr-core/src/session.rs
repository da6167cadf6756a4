//! The session loop: owns the engines and dispatches every [`LoopEvent`].
//!
//! ```text
//!   LoopEvent --> Session::handle
//!                   |-- Boot / markers / account / configurator --> BootSequencer
//!                   |                                                  |
//!                   |                                           SessionHost (BootHost)
//!                   |                                                  |
//!                   |-- child exit / timers / delegate ------------> ProcessSupervisor
//!                   |-- memory state ------------------------------> MemoryAdmissionControl
//!                   `-- control commands --> supervisor + StatusPublisher
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppCatalog;
use crate::boot::{
    BootEvent, BootHost, BootPhase, BootPlan, BootSequencer, CallTicket, Marker, MarkerFiles,
    SuspendMarker,
};
use crate::config::SysmgrConfig;
use crate::delegate::RuntimeDelegate;
use crate::event::{ControlCommand, EventSink, LoopEvent, StatusReply};
use crate::memory::{MemoryAdmissionControl, MemorySampler};
use crate::process::{ProcessLauncher, ProcessSupervisor, SupervisorError, SupervisorParts};
use crate::services::SessionServices;
use crate::status::StatusPublisher;

/// External collaborators a session is built from.
pub struct SessionParts {
    /// Application descriptors.
    pub catalog: Arc<dyn AppCatalog>,
    /// Native process creation.
    pub launcher: Box<dyn ProcessLauncher>,
    /// Per-process memory usage.
    pub sampler: Box<dyn MemorySampler>,
    /// Web runtime.
    pub delegate: Arc<dyn RuntimeDelegate>,
    /// Account, configurator, display lock and notices.
    pub services: Arc<dyn SessionServices>,
}

/// One device session.
pub struct Session {
    boot: BootSequencer,
    supervisor: ProcessSupervisor,
    status: StatusPublisher,
    markers: MarkerFiles,
    suspend: SuspendMarker,
    services: Arc<dyn SessionServices>,
    display_lock_client: String,
    display_lock_held: bool,
    shutdown_grace: Duration,
    sink: EventSink,
    events: mpsc::UnboundedReceiver<LoopEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("boot", &self.boot)
            .field("supervisor", &self.supervisor)
            .field("display_lock_held", &self.display_lock_held)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wires the engines together. Nothing runs until [`Session::start`] or
    /// [`Session::run`].
    #[must_use]
    pub fn new(config: &SysmgrConfig, parts: SessionParts) -> Self {
        let (sink, events) = EventSink::channel();

        let plan = BootPlan::new(&config.boot, parts.catalog.boot_time_apps());
        let memory = MemoryAdmissionControl::new(&config.memory, parts.sampler);
        let supervisor = ProcessSupervisor::new(
            &config.supervisor,
            SupervisorParts {
                catalog: parts.catalog,
                launcher: parts.launcher,
                memory,
                delegate: parts.delegate,
                services: Arc::clone(&parts.services),
            },
            sink.clone(),
        );

        Self {
            boot: BootSequencer::new(plan),
            supervisor,
            status: StatusPublisher::default(),
            markers: MarkerFiles::from_config(&config.paths),
            suspend: SuspendMarker::new(
                config.paths.suspend_marker.clone(),
                config.boot.hardware_profile.manages_suspend(),
            ),
            services: parts.services,
            display_lock_client: config.boot.display_lock_client.clone(),
            display_lock_held: false,
            shutdown_grace: config.supervisor.shutdown_grace,
            sink,
            events,
        }
    }

    /// Handle for producing events into this session.
    #[must_use]
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Current boot phase.
    #[must_use]
    pub const fn phase(&self) -> BootPhase {
        self.boot.phase()
    }

    /// The process supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The status publisher.
    #[must_use]
    pub const fn status(&self) -> &StatusPublisher {
        &self.status
    }

    /// Enters `Startup`.
    pub fn start(&mut self) {
        let (boot, mut host) = self.split();
        boot.start(&mut host);
    }

    /// Runs the loop until a [`LoopEvent::Shutdown`], then terminates
    /// native children within the shutdown grace period.
    pub async fn run(mut self) {
        self.start();
        while let Some(event) = self.events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }

        info!("session loop stopping");
        self.supervisor.terminate_all(self.shutdown_grace).await;
    }

    /// Handles every event already queued, without waiting. Returns how many
    /// were handled, or `None` if a shutdown was among them.
    pub fn dispatch_pending(&mut self) -> Option<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            handled += 1;
            if self.handle(event).is_break() {
                return None;
            }
        }
        Some(handled)
    }

    /// Dispatches one event.
    pub fn handle(&mut self, event: LoopEvent) -> ControlFlow<()> {
        match event {
            LoopEvent::Boot(event) => self.boot_event(event),
            LoopEvent::MarkersChanged => {
                let (boot, mut host) = self.split();
                boot.markers_changed(&mut host);
            },
            LoopEvent::AccountCreated { ticket, result } => {
                let (boot, mut host) = self.split();
                boot.on_account_created(ticket, result, &mut host);
            },
            LoopEvent::ConfiguratorFinished { ticket, result } => {
                let (boot, mut host) = self.split();
                boot.on_configurator_finished(ticket, result, &mut host);
            },
            LoopEvent::ChildExited => {
                let reaped = self.supervisor.reap();
                debug!(reaped, "child exit sweep");
            },
            LoopEvent::EscalationDue { process_id } => self.supervisor.escalate(process_id),
            LoopEvent::QuotaTick => self.supervisor.quota_tick(),
            LoopEvent::MemoryReportTick => self.supervisor.memory_report_tick(),
            LoopEvent::MemoryStateChanged(state) => {
                self.supervisor.set_memory_state(state);
            },
            LoopEvent::WebLaunchFinished {
                app_id,
                process_id,
                result,
            } => self
                .supervisor
                .web_launch_finished(&app_id, process_id, result),
            LoopEvent::DelegateConnected => {
                self.supervisor.delegate_connected();
                self.boot_event(BootEvent::DelegateAvailable);
            },
            LoopEvent::DelegateDisconnected => {
                self.supervisor.delegate_disconnected();
                self.boot_event(BootEvent::DelegateUnavailable);
            },
            LoopEvent::DelegateSnapshot { epoch, result } => {
                self.supervisor.apply_delegate_snapshot(epoch, result);
            },
            LoopEvent::DelegateAppStarted { app_id, process_id } => {
                self.supervisor.delegate_app_started(&app_id, process_id);
            },
            LoopEvent::DelegateAppClosed { process_id } => {
                self.supervisor.delegate_app_closed(process_id);
            },
            LoopEvent::Control(command) => self.control(command),
            LoopEvent::Shutdown => {
                info!("shutdown requested");
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }

    fn boot_event(&mut self, event: BootEvent) {
        let (boot, mut host) = self.split();
        boot.handle_event(event, &mut host);
    }

    fn control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Status { subscribe, reply } => {
                let updates = subscribe.then(|| self.status.subscribe());
                let _ = reply.send(StatusReply {
                    status: self.status.current(),
                    updates,
                });
            },
            ControlCommand::Launch {
                app_id,
                params,
                reply,
            } => {
                let _ = reply.send(self.supervisor.launch(&app_id, &params));
            },
            ControlCommand::Kill { app_id, reply } => {
                let _ = reply.send(self.supervisor.kill_by_app_id(&app_id));
            },
            ControlCommand::Suspend { app_id, reply } => {
                let _ = reply.send(self.supervisor.suspend(&app_id));
            },
            ControlCommand::Resume { app_id, reply } => {
                let _ = reply.send(self.supervisor.resume(&app_id));
            },
            ControlCommand::LaunchUrl {
                url,
                window_type,
                params,
                reply,
            } => {
                let _ = reply.send(self.supervisor.launch_url(&url, window_type, &params, None));
            },
            ControlCommand::ListRunning { reply } => {
                let _ = reply.send(self.supervisor.running());
            },
        }
    }

    fn split(&mut self) -> (&mut BootSequencer, SessionHost<'_>) {
        let host = SessionHost {
            supervisor: &mut self.supervisor,
            status: &mut self.status,
            markers: &self.markers,
            suspend: &self.suspend,
            services: &self.services,
            sink: &self.sink,
            display_lock_client: &self.display_lock_client,
            display_lock_held: &mut self.display_lock_held,
        };
        (&mut self.boot, host)
    }
}

/// What the boot sequencer can do to the rest of the session.
struct SessionHost<'a> {
    supervisor: &'a mut ProcessSupervisor,
    status: &'a mut StatusPublisher,
    markers: &'a MarkerFiles,
    suspend: &'a SuspendMarker,
    services: &'a Arc<dyn SessionServices>,
    sink: &'a EventSink,
    display_lock_client: &'a str,
    display_lock_held: &'a mut bool,
}

impl BootHost for SessionHost<'_> {
    fn marker_present(&self, marker: Marker) -> bool {
        self.markers.present(marker)
    }

    fn launch_app(&mut self, app_id: &str) {
        match self.supervisor.launch(app_id, "") {
            Ok(process_id) => debug!(app_id, %process_id, "boot application launched"),
            Err(error) => warn!(app_id, %error, "failed to launch boot application"),
        }
    }

    fn kill_app(&mut self, app_id: &str) {
        match self.supervisor.kill_by_app_id(app_id) {
            Ok(()) => {},
            Err(SupervisorError::NotRunning { .. }) => {
                debug!(app_id, "application already gone");
            },
            Err(error) => warn!(app_id, %error, "failed to kill application"),
        }
    }

    fn set_display_lock(&mut self, held: bool) {
        if *self.display_lock_held == held {
            return;
        }
        *self.display_lock_held = held;

        let services = Arc::clone(self.services);
        let client = self.display_lock_client.to_string();
        if held {
            self.sink
                .spawn_best_effort("acquire_display_lock", async move {
                    services.acquire_display_lock(client).await
                });
        } else {
            self.sink
                .spawn_best_effort("release_display_lock", async move {
                    services.release_display_lock(client).await
                });
        }
    }

    fn set_suspend_allowed(&mut self, allowed: bool) {
        self.suspend.set(allowed);
    }

    fn create_local_account(&mut self, ticket: CallTicket) {
        let services = Arc::clone(self.services);
        self.sink.spawn_call(
            async move { services.create_local_account().await },
            move |result| LoopEvent::AccountCreated { ticket, result },
        );
    }

    fn run_configurator(&mut self, ticket: CallTicket) {
        let services = Arc::clone(self.services);
        self.sink.spawn_call(
            async move { services.run_configurator().await },
            move |result| LoopEvent::ConfiguratorFinished { ticket, result },
        );
    }

    fn publish_phase(&mut self, phase: BootPhase) {
        self.status.publish(phase);
    }
}
