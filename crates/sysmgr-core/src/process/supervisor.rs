use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    AppKind, ApplicationProcess, ExitKind, LaunchSpec, ProcessId, ProcessLauncher, ProcessSignal,
    ProcessSummary, Registry, SupervisorError,
};
use crate::app::{AppCatalog, AppDescriptor};
use crate::config::SupervisorConfig;
use crate::delegate::{
    CacheScope, RuntimeDelegate, UrlLaunchRequest, WebAppEntry, WebLaunchRequest, WindowType,
};
use crate::error::TransportError;
use crate::event::{EventSink, LoopEvent};
use crate::memory::{MemoryAdmissionControl, SystemMemoryState};
use crate::services::{SessionServices, TerminationNotice};

/// Poll interval while waiting for children during shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Largest process id handed out or accepted from the web runtime. Ids
/// travel as JSON numbers, so they stay within the exactly representable
/// integer range.
pub const MAX_PROCESS_ID: u64 = (1 << 53) - 1;

/// Collaborators injected into the supervisor.
pub struct SupervisorParts {
    /// Application descriptors.
    pub catalog: Arc<dyn AppCatalog>,
    /// Native process creation.
    pub launcher: Box<dyn ProcessLauncher>,
    /// Admission control and quotas.
    pub memory: MemoryAdmissionControl,
    /// Web runtime.
    pub delegate: Arc<dyn RuntimeDelegate>,
    /// Terminated-application notices.
    pub services: Arc<dyn SessionServices>,
}

/// Owns every running application instance.
///
/// All methods run on the session loop. Anything slow is spawned through the
/// [`EventSink`] and comes back as a [`LoopEvent`].
pub struct ProcessSupervisor {
    catalog: Arc<dyn AppCatalog>,
    launcher: Box<dyn ProcessLauncher>,
    memory: MemoryAdmissionControl,
    delegate: Arc<dyn RuntimeDelegate>,
    services: Arc<dyn SessionServices>,
    sink: EventSink,
    registry: Registry,
    /// Web launches sent to the runtime and not yet confirmed, by app id.
    pending_web: HashMap<String, ProcessId>,
    delegate_connected: bool,
    delegate_epoch: u64,
    next_id: u64,
    termination_grace: Duration,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("registry", &self.registry)
            .field("pending_web", &self.pending_web)
            .field("delegate_connected", &self.delegate_connected)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Creates a supervisor with nothing running and the web runtime
    /// disconnected.
    #[must_use]
    pub fn new(config: &SupervisorConfig, parts: SupervisorParts, sink: EventSink) -> Self {
        Self {
            catalog: parts.catalog,
            launcher: parts.launcher,
            memory: parts.memory,
            delegate: parts.delegate,
            services: parts.services,
            sink,
            registry: Registry::new(),
            pending_web: HashMap::new(),
            delegate_connected: false,
            delegate_epoch: 0,
            next_id: 0,
            termination_grace: config.termination_grace,
        }
    }

    // ---------------------------------------------------------------------
    // Launch
    // ---------------------------------------------------------------------

    /// Launches an application, or relaunches it if it is already running.
    ///
    /// Web launches return as soon as the request is sent; the instance is
    /// recorded once the runtime confirms it.
    pub fn launch(&mut self, app_id: &str, params: &str) -> Result<ProcessId, SupervisorError> {
        if let Some(process_id) = self.registry.process_id_for(app_id) {
            info!(app_id, %process_id, "application already running, relaunching");
            self.relaunch(app_id, params);
            return Ok(process_id);
        }

        if let Some(process_id) = self.pending_web.get(app_id).copied() {
            debug!(app_id, %process_id, "web launch already in flight");
            return Ok(process_id);
        }

        let descriptor = self
            .catalog
            .descriptor(app_id)
            .ok_or_else(|| SupervisorError::NotFound {
                app_id: app_id.to_string(),
            })?;

        if descriptor.locked {
            warn!(app_id, "refusing to launch locked application");
            return Err(SupervisorError::Locked {
                app_id: app_id.to_string(),
            });
        }

        match descriptor.kind {
            AppKind::Web => self.launch_web(&descriptor, params),
            AppKind::Native => self.launch_native(&descriptor),
        }
    }

    fn launch_native(&mut self, descriptor: &AppDescriptor) -> Result<ProcessId, SupervisorError> {
        let app_id = descriptor.id.as_str();
        let required_mb = descriptor.required_memory_mb;

        if !self.memory.admit(required_mb) {
            let state = self.memory.state();
            warn!(app_id, required_mb, %state, "not enough memory to launch native application");
            return Err(SupervisorError::AdmissionRefused {
                app_id: app_id.to_string(),
                required_mb,
                state,
            });
        }

        let spec = LaunchSpec::builder()
            .app_id(app_id)
            .program(&descriptor.entry_point)
            .args(descriptor.args.iter().cloned())
            .cwd(descriptor.cwd.clone())
            .envs(&descriptor.env)
            .build();

        let process_id = self.allocate_id(app_id)?;
        let handle = self.launcher.spawn(&spec).map_err(|error| {
            warn!(app_id, %error, "failed to launch native application");
            SupervisorError::LaunchFailed {
                app_id: app_id.to_string(),
                reason: error.to_string(),
            }
        })?;

        let pid = handle.pid();
        self.registry.insert(ApplicationProcess::native(
            app_id.to_string(),
            process_id,
            handle,
        ));

        if required_mb > 0 {
            self.memory.register_quota(process_id, pid, required_mb);
            self.arm_quota_tick();
        }

        info!(app_id, %process_id, pid, "native application launched");
        Ok(process_id)
    }

    fn launch_web(
        &mut self,
        descriptor: &AppDescriptor,
        params: &str,
    ) -> Result<ProcessId, SupervisorError> {
        if !self.delegate_connected {
            warn!(app_id = %descriptor.id, "web runtime unavailable, cannot launch");
            return Err(SupervisorError::DelegateUnavailable {
                app_id: descriptor.id.clone(),
            });
        }

        let process_id = self.allocate_id(&descriptor.id)?;
        self.pending_web.insert(descriptor.id.clone(), process_id);

        let request = WebLaunchRequest {
            app_id: descriptor.id.clone(),
            process_id,
            entry_point: descriptor.entry_point.clone(),
            params: params.to_string(),
            launching_app_id: None,
        };
        let delegate = Arc::clone(&self.delegate);
        let app_id = descriptor.id.clone();
        self.sink.spawn_call(
            async move { delegate.launch_web(request).await },
            move |result| LoopEvent::WebLaunchFinished {
                app_id,
                process_id,
                result,
            },
        );

        info!(app_id = %descriptor.id, %process_id, "web application launch requested");
        Ok(process_id)
    }

    /// Handles the runtime's answer to a launch request. Answers for
    /// launches that were since cancelled or superseded are ignored.
    pub fn web_launch_finished(
        &mut self,
        app_id: &str,
        process_id: ProcessId,
        result: Result<(), TransportError>,
    ) {
        if self.pending_web.get(app_id) != Some(&process_id) {
            debug!(app_id, %process_id, "ignoring stale web launch completion");
            return;
        }
        self.pending_web.remove(app_id);

        match result {
            Ok(()) => {
                self.track_web(app_id, process_id);
                info!(app_id, %process_id, "web application started");
            },
            Err(error) => warn!(app_id, %process_id, %error, "web application launch failed"),
        }
    }

    /// Opens a URL in a new runtime window.
    ///
    /// The window gets a fresh process id; it is tracked once the runtime
    /// reports it started, like any other web instance.
    pub fn launch_url(
        &mut self,
        url: &str,
        window_type: WindowType,
        params: &str,
        launching_app_id: Option<String>,
    ) -> Result<ProcessId, SupervisorError> {
        if !self.delegate_connected {
            warn!(url, "web runtime unavailable, cannot open URL");
            return Err(SupervisorError::DelegateUnavailable {
                app_id: url.to_string(),
            });
        }

        let process_id = self.allocate_id(url)?;
        let request = UrlLaunchRequest {
            url: url.to_string(),
            window_type,
            process_id,
            params: params.to_string(),
            launching_app_id,
        };
        let delegate = Arc::clone(&self.delegate);
        self.sink
            .spawn_best_effort("launch_url", async move { delegate.launch_url(request).await });

        info!(url, ?window_type, %process_id, "URL launch requested");
        Ok(process_id)
    }

    /// Forwards new parameters to a running application.
    ///
    /// Only web applications support this; for native ones it is logged and
    /// ignored.
    pub fn relaunch(&mut self, app_id: &str, params: &str) {
        let kind = self
            .registry
            .by_app_id(app_id)
            .map(ApplicationProcess::kind)
            .or_else(|| self.catalog.descriptor(app_id).map(|d| d.kind));

        match kind {
            Some(AppKind::Web) => {
                if !self.delegate_connected {
                    warn!(app_id, "web runtime unavailable, relaunch dropped");
                    return;
                }
                let delegate = Arc::clone(&self.delegate);
                let (app_id, params) = (app_id.to_string(), params.to_string());
                self.sink.spawn_best_effort("relaunch_web", async move {
                    delegate.relaunch_web(app_id, params).await
                });
            },
            Some(AppKind::Native) => {
                info!(app_id, "relaunch is not supported for native applications");
            },
            None => debug!(app_id, "relaunch of unknown application ignored"),
        }
    }

    // ---------------------------------------------------------------------
    // Suspend / resume
    // ---------------------------------------------------------------------

    /// Stops a native application with SIGSTOP. Web applications are paused
    /// by the runtime itself, so for them this is logged and ignored.
    pub fn suspend(&mut self, app_id: &str) -> Result<(), SupervisorError> {
        self.set_stopped(app_id, true)
    }

    /// Continues a suspended native application with SIGCONT.
    pub fn resume(&mut self, app_id: &str) -> Result<(), SupervisorError> {
        self.set_stopped(app_id, false)
    }

    fn set_stopped(&mut self, app_id: &str, stopped: bool) -> Result<(), SupervisorError> {
        let Some(process) = self
            .registry
            .process_id_for(app_id)
            .and_then(|process_id| self.registry.get_mut(process_id))
        else {
            return Err(SupervisorError::NotRunning {
                target: app_id.to_string(),
            });
        };

        let process_id = process.process_id();
        if process.kind() == AppKind::Web {
            info!(app_id, stopped, "suspend and resume are not supported for web applications");
            return Ok(());
        }
        if process.is_terminating() {
            debug!(app_id, %process_id, "application is terminating, not signalled");
            return Ok(());
        }
        if process.is_suspended() == stopped {
            debug!(app_id, %process_id, stopped, "application already in requested state");
            return Ok(());
        }

        let signal = if stopped {
            ProcessSignal::Stop
        } else {
            ProcessSignal::Continue
        };
        if let Some(handle) = process.os_handle_mut() {
            handle
                .signal(signal)
                .map_err(|source| SupervisorError::SignalFailed {
                    app_id: app_id.to_string(),
                    source,
                })?;
        }
        process.set_suspended(stopped);

        if stopped {
            info!(app_id, %process_id, "native application suspended");
        } else {
            info!(app_id, %process_id, "native application resumed");
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Termination
    // ---------------------------------------------------------------------

    /// Kills the running instance of an application, or cancels its
    /// in-flight web launch.
    pub fn kill_by_app_id(&mut self, app_id: &str) -> Result<(), SupervisorError> {
        if let Some(process_id) = self.registry.process_id_for(app_id) {
            return self.kill_by_process_id(process_id);
        }

        if let Some(process_id) = self.pending_web.remove(app_id) {
            info!(app_id, %process_id, "cancelling in-flight web launch");
            self.request_web_kill(process_id);
            self.post_terminated(app_id);
            return Ok(());
        }

        Err(SupervisorError::NotRunning {
            target: app_id.to_string(),
        })
    }

    /// Kills one instance.
    ///
    /// Native processes get SIGTERM now and SIGKILL when the grace period
    /// expires; web applications are closed through the runtime. Either way
    /// the entry stays until the exit is observed.
    pub fn kill_by_process_id(&mut self, process_id: ProcessId) -> Result<(), SupervisorError> {
        if self.registry.get(process_id).is_none() {
            if let Some(app_id) = self.pending_app_for(process_id) {
                return self.kill_by_app_id(&app_id);
            }
            return Err(SupervisorError::NotRunning {
                target: process_id.to_string(),
            });
        }
        let Some(process) = self.registry.get_mut(process_id) else {
            return Err(SupervisorError::NotRunning {
                target: process_id.to_string(),
            });
        };

        let app_id = process.app_id().to_string();
        match process.kind() {
            AppKind::Native => {
                if process.is_terminating() {
                    debug!(app_id, %process_id, "termination already in progress");
                    return Ok(());
                }
                process.mark_terminating();
                let suspended = process.is_suspended();
                process.set_suspended(false);
                if let Some(handle) = process.os_handle_mut() {
                    let pid = handle.pid();
                    warn!(app_id, %process_id, pid, "terminating native application");
                    if let Err(error) = handle.signal(ProcessSignal::Graceful) {
                        warn!(app_id, %process_id, %error, "failed to send SIGTERM");
                    }
                    // A stopped process only acts on SIGTERM once continued.
                    if suspended && let Err(error) = handle.signal(ProcessSignal::Continue) {
                        warn!(app_id, %process_id, %error, "failed to send SIGCONT");
                    }
                }
                self.sink.send_after(
                    self.termination_grace,
                    LoopEvent::EscalationDue { process_id },
                );
            },
            AppKind::Web => {
                warn!(app_id, %process_id, "closing web application");
                self.request_web_kill(process_id);
            },
        }

        self.post_terminated(&app_id);
        Ok(())
    }

    /// Forces a process that outlived its grace period. Does nothing if it
    /// already exited.
    pub fn escalate(&mut self, process_id: ProcessId) {
        let Some(handle) = self
            .registry
            .get_mut(process_id)
            .and_then(|process| process.os_handle_mut())
        else {
            debug!(%process_id, "escalation cancelled, process already gone");
            return;
        };

        match handle.try_wait() {
            Ok(Some(exit)) => {
                self.finish(process_id, Some(exit));
                return;
            },
            Ok(None) => {},
            Err(error) => warn!(%process_id, %error, "failed to query exit status"),
        }

        if let Some(handle) = self
            .registry
            .get_mut(process_id)
            .and_then(|process| process.os_handle_mut())
        {
            warn!(%process_id, pid = handle.pid(), "grace period expired, sending SIGKILL");
            if let Err(error) = handle.signal(ProcessSignal::Forced) {
                warn!(%process_id, %error, "failed to send SIGKILL");
            }
        }
    }

    fn request_web_kill(&self, process_id: ProcessId) {
        if !self.delegate_connected {
            warn!(%process_id, "web runtime unavailable, kill dropped");
            return;
        }
        let delegate = Arc::clone(&self.delegate);
        self.sink
            .spawn_best_effort("kill_web", async move { delegate.kill_web(process_id).await });
    }

    fn post_terminated(&self, app_id: &str) {
        let descriptor = self.catalog.descriptor(app_id);
        let notice = TerminationNotice {
            title: descriptor
                .as_ref()
                .and_then(|d| d.title.clone())
                .unwrap_or_default(),
            app_name: descriptor.as_ref().map_or_else(
                || "Application".to_string(),
                |d| d.display_name().to_string(),
            ),
            app_id: app_id.to_string(),
        };
        let services = Arc::clone(&self.services);
        self.sink
            .spawn_best_effort("post_application_terminated", async move {
                services.post_application_terminated(notice).await
            });
    }

    // ---------------------------------------------------------------------
    // Exit tracking
    // ---------------------------------------------------------------------

    /// Collects every native child that has exited. Returns how many were
    /// reaped.
    pub fn reap(&mut self) -> usize {
        let mut exited = Vec::new();
        for process in self.registry.iter_mut() {
            let process_id = process.process_id();
            if let Some(handle) = process.os_handle_mut() {
                match handle.try_wait() {
                    Ok(Some(exit)) => exited.push((process_id, exit)),
                    Ok(None) => {},
                    Err(error) => warn!(%process_id, %error, "failed to query exit status"),
                }
            }
        }

        let count = exited.len();
        for (process_id, exit) in exited {
            self.finish(process_id, Some(exit));
        }
        count
    }

    /// Forgets a finished instance and its quota.
    ///
    /// Matched by process id only, so a notification for an instance that was
    /// already replaced leaves the newer one alone. Returns whether anything
    /// was removed.
    pub fn notify_finished(&mut self, process_id: ProcessId) -> bool {
        self.finish(process_id, None)
    }

    fn finish(&mut self, process_id: ProcessId, exit: Option<ExitKind>) -> bool {
        if let Some(process) = self.registry.remove(process_id) {
            self.memory.unregister_quota(process_id);
            match exit {
                Some(exit) => {
                    info!(app_id = process.app_id(), %process_id, %exit, "application exited");
                },
                None => info!(app_id = process.app_id(), %process_id, "application finished"),
            }
            return true;
        }

        if let Some(app_id) = self.pending_app_for(process_id) {
            self.pending_web.remove(&app_id);
            info!(app_id, %process_id, "web application closed before launch confirmation");
            return true;
        }

        debug!(%process_id, "finish notification for untracked process");
        false
    }

    // ---------------------------------------------------------------------
    // Web runtime connectivity
    // ---------------------------------------------------------------------

    /// The runtime connected: ask it for everything it is running.
    pub fn delegate_connected(&mut self) {
        self.delegate_connected = true;
        self.delegate_epoch += 1;
        let epoch = self.delegate_epoch;
        info!(epoch, "web runtime connected, requesting running applications");

        let delegate = Arc::clone(&self.delegate);
        self.sink.spawn_call(
            async move { delegate.list_running().await },
            move |result| LoopEvent::DelegateSnapshot { epoch, result },
        );
    }

    /// The runtime went away, taking every web application with it.
    pub fn delegate_disconnected(&mut self) {
        self.delegate_connected = false;
        self.delegate_epoch += 1;

        let removed = self.registry.remove_kind(AppKind::Web);
        let pending = self.pending_web.len();
        self.pending_web.clear();
        warn!(
            removed = removed.len(),
            pending, "web runtime disconnected, dropping web applications"
        );
    }

    /// Replaces the web part of the registry with the runtime's snapshot.
    /// Snapshots from an earlier connection are ignored.
    pub fn apply_delegate_snapshot(
        &mut self,
        epoch: u64,
        result: Result<Vec<WebAppEntry>, TransportError>,
    ) {
        if epoch != self.delegate_epoch || !self.delegate_connected {
            debug!(epoch, current = self.delegate_epoch, "ignoring stale web snapshot");
            return;
        }

        let entries = match result {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "failed to list running web applications");
                return;
            },
        };

        let listed: HashSet<ProcessId> = entries.iter().map(|entry| entry.process_id).collect();
        for process_id in self.registry.ids_of_kind(AppKind::Web) {
            if !listed.contains(&process_id) {
                self.registry.remove(process_id);
            }
        }

        let count = entries.len();
        for entry in entries {
            if self.pending_web.get(&entry.app_id) == Some(&entry.process_id) {
                self.pending_web.remove(&entry.app_id);
            }
            self.track_web(&entry.app_id, entry.process_id);
        }
        info!(count, "web registry resynchronized");
    }

    /// The runtime reports a started application.
    pub fn delegate_app_started(&mut self, app_id: &str, process_id: ProcessId) {
        if !self.delegate_connected {
            debug!(app_id, %process_id, "ignoring start event while disconnected");
            return;
        }
        if self.pending_web.get(app_id) == Some(&process_id) {
            self.pending_web.remove(app_id);
        }
        self.track_web(app_id, process_id);
    }

    /// The runtime reports a closed application. Only web instances and
    /// pending web launches are affected; native ones leave through their
    /// own exit.
    pub fn delegate_app_closed(&mut self, process_id: ProcessId) {
        if let Some(process) = self.registry.get(process_id)
            && process.kind() == AppKind::Native
        {
            warn!(
                app_id = process.app_id(),
                %process_id,
                "web runtime reports a native process closed, ignoring"
            );
            return;
        }
        self.finish(process_id, None);
    }

    fn track_web(&mut self, app_id: &str, process_id: ProcessId) {
        if process_id.as_u64() > MAX_PROCESS_ID {
            warn!(app_id, %process_id, "web runtime reports an out-of-range process id, ignoring");
            return;
        }
        if let Some(existing) = self.registry.get(process_id) {
            if existing.kind() == AppKind::Native {
                warn!(
                    app_id,
                    %process_id,
                    native = existing.app_id(),
                    "web runtime reports a process id held by a native application, ignoring"
                );
            }
            return;
        }
        if self
            .registry
            .by_app_id(app_id)
            .is_some_and(|existing| existing.kind() == AppKind::Native)
        {
            warn!(app_id, %process_id, "web runtime reports an application running natively, ignoring");
            return;
        }

        self.next_id = self.next_id.max(process_id.as_u64());
        let replaced = self
            .registry
            .insert(ApplicationProcess::web(app_id.to_string(), process_id));
        if let Some(old) = replaced {
            debug!(app_id, old = %old.process_id(), new = %process_id, "replaced web instance");
        }
    }

    // ---------------------------------------------------------------------
    // Memory
    // ---------------------------------------------------------------------

    /// Runs one quota enforcement pass and kills the violators.
    pub fn quota_tick(&mut self) {
        self.memory.tick_fired();
        for process_id in self.memory.enforce() {
            if let Err(error) = self.kill_by_process_id(process_id) {
                debug!(%process_id, %error, "quota violator already gone");
            }
        }
        self.arm_quota_tick();
    }

    /// Records a new system memory state.
    ///
    /// Rising to `Medium` or worse asks the runtime to drop its caches, and
    /// any state other than `Normal` starts the periodic low-memory report.
    pub fn set_memory_state(&mut self, state: SystemMemoryState) -> bool {
        let previous = self.memory.state();
        if !self.memory.set_state(state) {
            return false;
        }
        if state > previous && state >= SystemMemoryState::Medium {
            self.clear_memory_caches(CacheScope::All);
        }
        self.arm_memory_report();
        true
    }

    /// Asks the runtime to drop memory caches. Skipped while it is
    /// disconnected.
    pub fn clear_memory_caches(&self, scope: CacheScope) {
        if !self.delegate_connected {
            debug!(?scope, "web runtime unavailable, cache clear skipped");
            return;
        }
        debug!(?scope, "clearing web runtime memory caches");
        let delegate = Arc::clone(&self.delegate);
        self.sink
            .spawn_best_effort("clear_memory_caches", async move {
                delegate.clear_memory_caches(scope).await
            });
    }

    /// Logs the memory state with the daemon's own usage, then re-arms
    /// unless the state went back to `Normal`.
    pub fn memory_report_tick(&mut self) {
        self.memory.report_fired();
        let state = self.memory.state();
        if state == SystemMemoryState::Normal {
            return;
        }
        match self.memory.own_usage_mb() {
            Some(rss_mb) => warn!(%state, rss_mb, "low memory"),
            None => warn!(%state, "low memory, own usage unavailable"),
        }
        self.arm_memory_report();
    }

    /// Admission control and quotas.
    #[must_use]
    pub const fn memory(&self) -> &MemoryAdmissionControl {
        &self.memory
    }

    fn arm_quota_tick(&mut self) {
        if let Some(delay) = self.memory.arm_tick() {
            self.sink.send_after(delay, LoopEvent::QuotaTick);
        }
    }

    fn arm_memory_report(&mut self) {
        if let Some(delay) = self.memory.arm_report() {
            self.sink.send_after(delay, LoopEvent::MemoryReportTick);
        }
    }

    // ---------------------------------------------------------------------
    // Shutdown and queries
    // ---------------------------------------------------------------------

    /// SIGTERMs every native child, waits up to `grace` for them to exit,
    /// then SIGKILLs the rest.
    pub async fn terminate_all(&mut self, grace: Duration) {
        let count = self.registry.ids_of_kind(AppKind::Native).len();
        if count == 0 {
            return;
        }
        info!(count, "terminating native applications");

        self.signal_natives(ProcessSignal::Graceful);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            self.reap();
            if self.registry.ids_of_kind(AppKind::Native).is_empty() {
                info!("all native applications exited");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        warn!(
            remaining = self.registry.ids_of_kind(AppKind::Native).len(),
            "shutdown grace expired, sending SIGKILL"
        );
        self.signal_natives(ProcessSignal::Forced);
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        self.reap();
    }

    fn signal_natives(&mut self, signal: ProcessSignal) {
        for process in self.registry.iter_mut() {
            let process_id = process.process_id();
            let resume = signal == ProcessSignal::Graceful && process.is_suspended();
            if resume {
                process.set_suspended(false);
            }
            if let Some(handle) = process.os_handle_mut() {
                if let Err(error) = handle.signal(signal) {
                    warn!(%process_id, %error, "failed to signal process");
                }
                if resume && let Err(error) = handle.signal(ProcessSignal::Continue) {
                    warn!(%process_id, %error, "failed to continue process");
                }
            }
        }
    }

    /// Every running application.
    #[must_use]
    pub fn running(&self) -> Vec<ProcessSummary> {
        self.registry.iter().map(ApplicationProcess::summary).collect()
    }

    /// Whether an application is running.
    #[must_use]
    pub fn is_running(&self, app_id: &str) -> bool {
        self.registry.process_id_for(app_id).is_some()
    }

    /// The tracked instances.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether the web runtime is connected.
    #[must_use]
    pub const fn is_delegate_connected(&self) -> bool {
        self.delegate_connected
    }

    /// Whether a web launch for the application awaits confirmation.
    #[must_use]
    pub fn is_launch_pending(&self, app_id: &str) -> bool {
        self.pending_web.contains_key(app_id)
    }

    fn allocate_id(&mut self, app_id: &str) -> Result<ProcessId, SupervisorError> {
        let next = self
            .next_id
            .checked_add(1)
            .filter(|next| *next <= MAX_PROCESS_ID)
            .ok_or_else(|| {
                warn!(app_id, "process ids exhausted");
                SupervisorError::LaunchFailed {
                    app_id: app_id.to_string(),
                    reason: "process ids exhausted".to_string(),
                }
            })?;
        self.next_id = next;
        Ok(ProcessId::new(next))
    }

    fn pending_app_for(&self, process_id: ProcessId) -> Option<String> {
        self.pending_web
            .iter()
            .find(|(_, pending)| **pending == process_id)
            .map(|(app_id, _)| app_id.clone())
    }
}
