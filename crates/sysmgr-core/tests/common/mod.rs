//! Fake collaborators shared by the session integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysmgr_core::TransportError;
use sysmgr_core::app::{AppDescriptor, StaticCatalog};
use sysmgr_core::config::{BootConfig, PathsConfig, SysmgrConfig};
use sysmgr_core::delegate::{
    CacheScope, RuntimeDelegate, UrlLaunchRequest, WebAppEntry, WebLaunchRequest,
};
use sysmgr_core::memory::MemorySampler;
use sysmgr_core::process::{
    ExitKind, LaunchSpec, OsProcess, ProcessError, ProcessId, ProcessLauncher, ProcessSignal,
};
use sysmgr_core::services::{SessionServices, TerminationNotice};
use sysmgr_core::session::{Session, SessionParts};
use tempfile::TempDir;

/// Handles every queued event until the loop goes idle.
pub async fn pump(session: &mut Session) {
    for _ in 0..32 {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        match session.dispatch_pending() {
            Some(0) | None => break,
            Some(_) => {},
        }
    }
}

#[derive(Debug, Default)]
struct Child {
    exit: Option<ExitKind>,
    signals: Vec<ProcessSignal>,
}

#[derive(Debug)]
struct FakeChild {
    pid: u32,
    state: Arc<Mutex<Child>>,
}

impl OsProcess for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError> {
        let mut child = self.state.lock().unwrap();
        child.signals.push(signal);
        if child.exit.is_none() {
            child.exit = match signal {
                ProcessSignal::Graceful => Some(ExitKind::Signal(15)),
                ProcessSignal::Forced => Some(ExitKind::Signal(9)),
                ProcessSignal::Stop | ProcessSignal::Continue => None,
            };
        }
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<ExitKind>, ProcessError> {
        Ok(self.state.lock().unwrap().exit)
    }
}

/// Launcher whose children exit when signalled. Pids start at 4001.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    children: Arc<Mutex<Vec<(String, u32, Arc<Mutex<Child>>)>>>,
}

impl Launcher {
    pub fn pid_of(&self, app_id: &str) -> Option<u32> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == app_id)
            .map(|(_, pid, _)| *pid)
    }

    pub fn signals(&self, pid: u32) -> Vec<ProcessSignal> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .find(|(_, candidate, _)| *candidate == pid)
            .map(|(_, _, child)| child.lock().unwrap().signals.clone())
            .unwrap_or_default()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

impl ProcessLauncher for Launcher {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Box<dyn OsProcess>, ProcessError> {
        let mut children = self.children.lock().unwrap();
        let pid = 4001 + u32::try_from(children.len()).unwrap();
        let state = Arc::new(Mutex::new(Child::default()));
        children.push((spec.app_id.clone(), pid, Arc::clone(&state)));
        Ok(Box::new(FakeChild { pid, state }))
    }
}

/// Sampler reporting whatever the test sets.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    readings: Arc<Mutex<HashMap<u32, u64>>>,
}

impl Sampler {
    pub fn set(&self, pid: u32, mb: u64) {
        self.readings.lock().unwrap().insert(pid, mb);
    }
}

impl MemorySampler for Sampler {
    fn sample_mb(&self, pid: u32) -> Option<u64> {
        self.readings.lock().unwrap().get(&pid).copied()
    }
}

/// Web runtime with a settable list of running applications.
#[derive(Debug, Default)]
pub struct Runtime {
    pub running: Mutex<Vec<WebAppEntry>>,
    pub launches: Mutex<Vec<WebLaunchRequest>>,
    pub kills: Mutex<Vec<ProcessId>>,
    pub urls: Mutex<Vec<UrlLaunchRequest>>,
    pub cache_clears: Mutex<Vec<CacheScope>>,
}

impl Runtime {
    pub fn set_running(&self, entries: &[(&str, u64)]) {
        *self.running.lock().unwrap() = entries
            .iter()
            .map(|(app_id, id)| WebAppEntry {
                app_id: (*app_id).to_string(),
                process_id: ProcessId::new(*id),
            })
            .collect();
    }
}

#[async_trait]
impl RuntimeDelegate for Runtime {
    async fn launch_web(&self, request: WebLaunchRequest) -> Result<(), TransportError> {
        self.launches.lock().unwrap().push(request);
        Ok(())
    }

    async fn kill_web(&self, process_id: ProcessId) -> Result<(), TransportError> {
        self.kills.lock().unwrap().push(process_id);
        Ok(())
    }

    async fn relaunch_web(&self, _app_id: String, _params: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<WebAppEntry>, TransportError> {
        Ok(self.running.lock().unwrap().clone())
    }

    async fn launch_url(&self, request: UrlLaunchRequest) -> Result<(), TransportError> {
        self.urls.lock().unwrap().push(request);
        Ok(())
    }

    async fn clear_memory_caches(&self, scope: CacheScope) -> Result<(), TransportError> {
        self.cache_clears.lock().unwrap().push(scope);
        Ok(())
    }
}

/// Session services. Account creation writes the profile marker, the way
/// the account service does on a device.
#[derive(Debug)]
pub struct Services {
    pub profile_marker: PathBuf,
    pub log: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<TerminationNotice>>,
}

impl Services {
    pub fn new(profile_marker: &Path) -> Self {
        Self {
            profile_marker: profile_marker.to_path_buf(),
            log: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }
}

#[async_trait]
impl SessionServices for Services {
    async fn create_local_account(&self) -> Result<(), TransportError> {
        self.record("create_local_account");
        std::fs::write(&self.profile_marker, b"")?;
        Ok(())
    }

    async fn run_configurator(&self) -> Result<(), TransportError> {
        self.record("run_configurator");
        Ok(())
    }

    async fn post_application_terminated(
        &self,
        notice: TerminationNotice,
    ) -> Result<(), TransportError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }

    async fn acquire_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.record(&format!("acquire_display_lock {client}"));
        Ok(())
    }

    async fn release_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.record(&format!("release_display_lock {client}"));
        Ok(())
    }
}

/// A session over a temporary preferences directory.
pub struct Fixture {
    pub dir: TempDir,
    pub config: SysmgrConfig,
    pub launcher: Launcher,
    pub sampler: Sampler,
    pub runtime: Arc<Runtime>,
    pub services: Arc<Services>,
}

impl Fixture {
    pub fn new(apps: Vec<AppDescriptor>, boot: BootConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            preferences_dir: dir.path().join("preferences"),
            suspend_marker: dir.path().join("run/suspend-allowed"),
            ..PathsConfig::default()
        };
        std::fs::create_dir_all(&paths.preferences_dir).unwrap();

        let services = Arc::new(Services::new(&paths.profile_marker_path()));
        let config = SysmgrConfig {
            paths,
            boot,
            apps,
            ..SysmgrConfig::default()
        };

        Self {
            dir,
            config,
            launcher: Launcher::default(),
            sampler: Sampler::default(),
            runtime: Arc::new(Runtime::default()),
            services,
        }
    }

    pub fn session(&self) -> Session {
        Session::new(
            &self.config,
            SessionParts {
                catalog: Arc::new(StaticCatalog::new(self.config.apps.clone())),
                launcher: Box::new(self.launcher.clone()),
                sampler: Box::new(self.sampler.clone()),
                delegate: Arc::clone(&self.runtime) as Arc<dyn RuntimeDelegate>,
                services: Arc::clone(&self.services) as Arc<dyn SessionServices>,
            },
        )
    }

    pub fn touch_marker(&self, path: &Path) {
        std::fs::write(path, b"").unwrap();
    }
}
