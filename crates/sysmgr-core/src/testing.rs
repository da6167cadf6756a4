//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::delegate::{CacheScope, RuntimeDelegate, UrlLaunchRequest, WebAppEntry, WebLaunchRequest};
use crate::error::TransportError;
use crate::memory::MemorySampler;
use crate::process::{
    ExitKind, LaunchSpec, OsProcess, ProcessError, ProcessId, ProcessLauncher, ProcessSignal,
};
use crate::services::{SessionServices, TerminationNotice};

/// Lets spawned fire-and-forget calls run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
struct ProcState {
    exit: Option<ExitKind>,
    signals: Vec<ProcessSignal>,
    ignore_term: bool,
}

#[derive(Debug)]
struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<ProcState>>,
}

impl OsProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError> {
        let mut state = self.state.lock().unwrap();
        state.signals.push(signal);
        if state.exit.is_none() {
            match signal {
                ProcessSignal::Graceful if !state.ignore_term => {
                    state.exit = Some(ExitKind::Signal(15));
                },
                ProcessSignal::Forced => state.exit = Some(ExitKind::Signal(9)),
                ProcessSignal::Graceful | ProcessSignal::Stop | ProcessSignal::Continue => {},
            }
        }
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<ExitKind>, ProcessError> {
        Ok(self.state.lock().unwrap().exit)
    }
}

#[derive(Debug, Default)]
struct LauncherState {
    next_pid: u32,
    specs: Vec<LaunchSpec>,
    processes: HashMap<u32, Arc<Mutex<ProcState>>>,
    fail_next: bool,
    ignore_term: bool,
}

/// Launcher producing fake processes whose exits the test controls.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().specs.len()
    }

    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    pub fn last_pid(&self) -> u32 {
        self.state.lock().unwrap().next_pid + 999
    }

    pub fn signals(&self, pid: u32) -> Vec<ProcessSignal> {
        self.state.lock().unwrap().processes[&pid].lock().unwrap().signals.clone()
    }

    /// Makes the process exit as if on its own.
    pub fn exit(&self, pid: u32, exit: ExitKind) {
        self.state.lock().unwrap().processes[&pid].lock().unwrap().exit = Some(exit);
    }

    /// New processes ignore SIGTERM.
    pub fn ignore_term(&self) {
        self.state.lock().unwrap().ignore_term = true;
    }

    /// The next spawn fails.
    pub fn fail_next(&self) {
        self.state.lock().unwrap().fail_next = true;
    }
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Box<dyn OsProcess>, ProcessError> {
        let mut launcher = self.state.lock().unwrap();
        if std::mem::take(&mut launcher.fail_next) {
            return Err(ProcessError::SpawnFailed("No such file or directory".to_string()));
        }
        launcher.next_pid += 1;
        let pid = launcher.next_pid + 999;
        let state = Arc::new(Mutex::new(ProcState {
            ignore_term: launcher.ignore_term,
            ..ProcState::default()
        }));
        launcher.specs.push(spec.clone());
        launcher.processes.insert(pid, Arc::clone(&state));
        Ok(Box::new(FakeProcess { pid, state }))
    }
}

/// Sampler whose readings are set by the test.
#[derive(Debug, Clone, Default)]
pub struct FakeSampler {
    readings: Arc<Mutex<HashMap<u32, u64>>>,
}

impl FakeSampler {
    pub fn set(&self, pid: u32, mb: u64) {
        self.readings.lock().unwrap().insert(pid, mb);
    }

    pub fn remove(&self, pid: u32) {
        self.readings.lock().unwrap().remove(&pid);
    }
}

impl MemorySampler for FakeSampler {
    fn sample_mb(&self, pid: u32) -> Option<u64> {
        self.readings.lock().unwrap().get(&pid).copied()
    }
}

/// A call received by [`FakeDelegate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateCall {
    Launch(WebLaunchRequest),
    Kill(ProcessId),
    Relaunch { app_id: String, params: String },
    ListRunning,
    LaunchUrl(UrlLaunchRequest),
    ClearCaches(CacheScope),
}

/// Web runtime that records calls.
#[derive(Debug, Default)]
pub struct FakeDelegate {
    calls: Mutex<Vec<DelegateCall>>,
    snapshot: Mutex<Vec<WebAppEntry>>,
    fail_launch: AtomicBool,
}

impl FakeDelegate {
    pub fn calls(&self) -> Vec<DelegateCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_snapshot(&self, entries: Vec<WebAppEntry>) {
        *self.snapshot.lock().unwrap() = entries;
    }

    pub fn fail_launches(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuntimeDelegate for FakeDelegate {
    async fn launch_web(&self, request: WebLaunchRequest) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(DelegateCall::Launch(request));
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                reason: "launch refused".to_string(),
            });
        }
        Ok(())
    }

    async fn kill_web(&self, process_id: ProcessId) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(DelegateCall::Kill(process_id));
        Ok(())
    }

    async fn relaunch_web(&self, app_id: String, params: String) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(DelegateCall::Relaunch { app_id, params });
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<WebAppEntry>, TransportError> {
        self.calls.lock().unwrap().push(DelegateCall::ListRunning);
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn launch_url(&self, request: UrlLaunchRequest) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(DelegateCall::LaunchUrl(request));
        Ok(())
    }

    async fn clear_memory_caches(&self, scope: CacheScope) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(DelegateCall::ClearCaches(scope));
        Ok(())
    }
}

/// A call received by [`FakeServices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CreateLocalAccount,
    RunConfigurator,
    Terminated(TerminationNotice),
    AcquireDisplayLock(String),
    ReleaseDisplayLock(String),
}

/// Session services that record calls.
#[derive(Debug, Default)]
pub struct FakeServices {
    calls: Mutex<Vec<ServiceCall>>,
    fail_account: AtomicBool,
}

impl FakeServices {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_account_creation(&self) {
        self.fail_account.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: ServiceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionServices for FakeServices {
    async fn create_local_account(&self) -> Result<(), TransportError> {
        self.record(ServiceCall::CreateLocalAccount);
        if self.fail_account.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("com.palm.service.accounts"));
        }
        Ok(())
    }

    async fn run_configurator(&self) -> Result<(), TransportError> {
        self.record(ServiceCall::RunConfigurator);
        Ok(())
    }

    async fn post_application_terminated(
        &self,
        notice: TerminationNotice,
    ) -> Result<(), TransportError> {
        self.record(ServiceCall::Terminated(notice));
        Ok(())
    }

    async fn acquire_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.record(ServiceCall::AcquireDisplayLock(client));
        Ok(())
    }

    async fn release_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.record(ServiceCall::ReleaseDisplayLock(client));
        Ok(())
    }
}
