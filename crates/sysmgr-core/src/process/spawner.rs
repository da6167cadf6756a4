//! Native process spawning.
//!
//! [`OsLauncher`] turns a [`LaunchSpec`] into a running child with a
//! controlled environment:
//!
//! 1. a role file is written to the roles directory (if configured) so the
//!    child may use the session bus;
//! 2. the child is spawned with stdin closed and `XDG_RUNTIME_DIR` pointing
//!    at the session runtime directory;
//! 3. the child is moved into the configured cgroup (best-effort).
//!
//! The supervisor only sees the [`ProcessLauncher`] and [`OsProcess`]
//! traits, which lets tests substitute fake processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{ExitKind, ProcessError};
use crate::config::{PathsConfig, SupervisorConfig};

/// Everything needed to start one native application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Application id, used for role registration.
    pub app_id: String,
    /// Executable.
    pub program: PathBuf,
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment.
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> LaunchSpecBuilder {
        LaunchSpecBuilder::default()
    }
}

/// Builder for [`LaunchSpec`].
#[derive(Debug, Default)]
pub struct LaunchSpecBuilder {
    app_id: String,
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl LaunchSpecBuilder {
    /// Sets the application id.
    #[must_use]
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Sets the executable.
    #[must_use]
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Adds one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds several environment variables.
    #[must_use]
    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Finishes the spec.
    #[must_use]
    pub fn build(self) -> LaunchSpec {
        LaunchSpec {
            app_id: self.app_id,
            program: self.program,
            args: self.args,
            cwd: self.cwd,
            env: self.env,
        }
    }
}

/// Signals the supervisor sends to native children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// SIGTERM, asking the process to exit.
    Graceful,
    /// SIGKILL.
    Forced,
    /// SIGSTOP, freezing the process.
    Stop,
    /// SIGCONT, resuming a stopped process.
    Continue,
}

impl ProcessSignal {
    const fn as_signal(self) -> Signal {
        match self {
            Self::Graceful => Signal::SIGTERM,
            Self::Forced => Signal::SIGKILL,
            Self::Stop => Signal::SIGSTOP,
            Self::Continue => Signal::SIGCONT,
        }
    }
}

/// A running native process owned by its `ApplicationProcess`.
pub trait OsProcess: std::fmt::Debug + Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Delivers a signal. Signalling a process that already exited is not
    /// an error.
    fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError>;

    /// Collects the exit status without blocking.
    fn try_wait(&mut self) -> Result<Option<ExitKind>, ProcessError>;
}

/// Creates native processes.
pub trait ProcessLauncher: Send {
    /// Spawns the process described by `spec`.
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Box<dyn OsProcess>, ProcessError>;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct OsLauncher {
    runtime_dir: PathBuf,
    environment: BTreeMap<String, String>,
    roles_dir: Option<PathBuf>,
    cgroup_tasks: Option<PathBuf>,
}

impl OsLauncher {
    /// Creates a launcher from the `[paths]` and `[supervisor]` sections.
    #[must_use]
    pub fn new(paths: &PathsConfig, supervisor: &SupervisorConfig) -> Self {
        Self {
            runtime_dir: paths.runtime_dir.clone(),
            environment: supervisor.environment.clone(),
            roles_dir: paths.roles_dir.clone(),
            cgroup_tasks: paths.cgroup_tasks.clone(),
        }
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.program);

        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .env("XDG_RUNTIME_DIR", &self.runtime_dir);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        for (k, v) in self.environment.iter().chain(&spec.env) {
            cmd.env(k, v);
        }

        cmd
    }
}

impl ProcessLauncher for OsLauncher {
    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Box<dyn OsProcess>, ProcessError> {
        if let Some(roles_dir) = &self.roles_dir {
            if let Err(error) = write_role_file(roles_dir, spec) {
                warn!(app_id = %spec.app_id, %error, "failed to write role file");
            }
        }

        let child = self
            .command(spec)
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::SpawnFailed("failed to get process ID".to_string()))?;

        if let Some(tasks) = &self.cgroup_tasks {
            if let Err(error) = std::fs::write(tasks, pid.to_string()) {
                warn!(app_id = %spec.app_id, pid, path = %tasks.display(), %error,
                    "failed to move process into cgroup");
            }
        }

        debug!(app_id = %spec.app_id, pid, program = %spec.program.display(), "spawned native process");
        Ok(Box::new(ChildProcess { child, pid }))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleFile<'a> {
    exe_name: &'a Path,
    #[serde(rename = "type")]
    role_type: &'static str,
    allowed_names: [&'a str; 1],
}

/// Writes `<roles_dir>/<app_id>.json` describing what the process may call.
/// Overwrites an existing file.
fn write_role_file(roles_dir: &Path, spec: &LaunchSpec) -> std::io::Result<()> {
    let role = RoleFile {
        exe_name: &spec.program,
        role_type: "regular",
        allowed_names: [&spec.app_id],
    };
    let json = serde_json::to_vec_pretty(&role).map_err(std::io::Error::other)?;
    std::fs::create_dir_all(roles_dir)?;
    std::fs::write(roles_dir.join(format!("{}.json", spec.app_id)), json)
}

#[derive(Debug)]
struct ChildProcess {
    child: Child,
    pid: u32,
}

impl OsProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError> {
        // A reaped pid may already belong to someone else.
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        #[allow(clippy::cast_possible_wrap)] // pids fit in i32
        let pid = Pid::from_raw(self.pid as i32);
        match kill(pid, signal.as_signal()) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::SignalFailed {
                pid: self.pid,
                source,
            }),
        }
    }

    fn try_wait(&mut self) -> Result<Option<ExitKind>, ProcessError> {
        self.child
            .try_wait()
            .map(|status| status.map(ExitKind::from_status))
            .map_err(|source| ProcessError::WaitFailed {
                pid: self.pid,
                source,
            })
    }
}
