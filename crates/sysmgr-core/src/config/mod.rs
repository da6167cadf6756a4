//! Configuration parsing and management.
//!
//! The daemon reads one TOML file (default `/etc/sysmgr/sysmgr.toml`). Every
//! section has defaults, so an empty file describes a working session with
//! the stock webOS paths and application ids.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::AppDescriptor;
use crate::backoff::BackoffConfig;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sysmgr/sysmgr.toml";

/// Top-level sysmgr configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SysmgrConfig {
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Boot sequencing.
    #[serde(default)]
    pub boot: BootConfig,

    /// Process supervision.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Memory admission control.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Web runtime delegate connection.
    #[serde(default)]
    pub delegate: DelegateConfig,

    /// Application catalog entries.
    #[serde(default)]
    pub apps: Vec<AppDescriptor>,
}

impl SysmgrConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for duplicate application ids, a
    /// zero violation threshold, or pressure thresholds that are not
    /// strictly decreasing from medium to critical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            if app.id.is_empty() {
                return Err(ConfigError::Validation(
                    "application id must not be empty".to_string(),
                ));
            }
            if !seen.insert(app.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate application id '{}'",
                    app.id
                )));
            }
        }

        if self.memory.violation_threshold == 0 {
            return Err(ConfigError::Validation(
                "memory.violation_threshold must be at least 1".to_string(),
            ));
        }

        let memory = &self.memory;
        if !(memory.medium_available_mb > memory.low_available_mb
            && memory.low_available_mb > memory.critical_available_mb)
        {
            return Err(ConfigError::Validation(format!(
                "memory thresholds must decrease: medium ({}) > low ({}) > critical ({})",
                memory.medium_available_mb, memory.low_available_mb, memory.critical_available_mb
            )));
        }

        Ok(())
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the boot marker files. Watched for changes.
    #[serde(default = "default_preferences_dir")]
    pub preferences_dir: PathBuf,

    /// "First run completed" marker, relative to `preferences_dir`.
    #[serde(default = "default_first_use_marker")]
    pub first_use_marker: PathBuf,

    /// "Local profile created" marker, relative to `preferences_dir`.
    #[serde(default = "default_profile_marker")]
    pub profile_marker: PathBuf,

    /// File whose presence allows the device to suspend.
    #[serde(default = "default_suspend_marker")]
    pub suspend_marker: PathBuf,

    /// Session runtime directory, exported to native children as
    /// `XDG_RUNTIME_DIR`.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Compositor socket name, relative to `runtime_dir`.
    #[serde(default = "default_compositor_socket")]
    pub compositor_socket: PathBuf,

    /// Directory of per-service bus sockets.
    #[serde(default = "default_bus_dir")]
    pub bus_dir: PathBuf,

    /// Control socket for status queries and launch requests.
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,

    /// Where native role files are written before spawn.
    #[serde(default)]
    pub roles_dir: Option<PathBuf>,

    /// cgroup `tasks` file native children are moved into.
    #[serde(default)]
    pub cgroup_tasks: Option<PathBuf>,
}

fn default_preferences_dir() -> PathBuf {
    PathBuf::from("/var/luna/preferences")
}

fn default_first_use_marker() -> PathBuf {
    PathBuf::from("ran-first-use")
}

fn default_profile_marker() -> PathBuf {
    PathBuf::from("first-use-profile-created")
}

fn default_suspend_marker() -> PathBuf {
    PathBuf::from("/var/run/sysmgr/suspend-allowed")
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/tmp/luna-session")
}

fn default_compositor_socket() -> PathBuf {
    PathBuf::from("wayland-0")
}

fn default_bus_dir() -> PathBuf {
    PathBuf::from("/var/run/sysmgr/bus")
}

fn default_control_socket() -> PathBuf {
    PathBuf::from("/var/run/sysmgr/sysmgr.sock")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            preferences_dir: default_preferences_dir(),
            first_use_marker: default_first_use_marker(),
            profile_marker: default_profile_marker(),
            suspend_marker: default_suspend_marker(),
            runtime_dir: default_runtime_dir(),
            compositor_socket: default_compositor_socket(),
            bus_dir: default_bus_dir(),
            control_socket: default_control_socket(),
            roles_dir: None,
            cgroup_tasks: None,
        }
    }
}

impl PathsConfig {
    /// Absolute path of the first-use marker.
    #[must_use]
    pub fn first_use_marker_path(&self) -> PathBuf {
        self.preferences_dir.join(&self.first_use_marker)
    }

    /// Absolute path of the profile marker.
    #[must_use]
    pub fn profile_marker_path(&self) -> PathBuf {
        self.preferences_dir.join(&self.profile_marker)
    }

    /// Absolute path of the compositor socket.
    #[must_use]
    pub fn compositor_socket_path(&self) -> PathBuf {
        self.runtime_dir.join(&self.compositor_socket)
    }
}

/// Hardware the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareProfile {
    /// Real device. The only profile that manages the suspend marker.
    #[default]
    Device,
    /// Emulator image.
    Emulator,
    /// Desktop build.
    Desktop,
}

impl HardwareProfile {
    /// Whether the Normal phase may allow suspend.
    #[must_use]
    pub const fn manages_suspend(self) -> bool {
        matches!(self, Self::Device)
    }
}

/// Boot sequencing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// Application launched for the first-use flow.
    #[serde(default = "default_first_use_app")]
    pub first_use_app: String,

    /// Auxiliary applications launched alongside the first-use app and
    /// killed when first use ends.
    #[serde(default)]
    pub setup_apps: Vec<String>,

    /// Launcher started in the Normal phase.
    #[serde(default = "default_launcher_app")]
    pub launcher_app: String,

    /// System UI started in the Normal phase.
    #[serde(default)]
    pub system_ui_app: Option<String>,

    /// Further applications started in the Normal phase.
    #[serde(default)]
    pub boot_apps: Vec<String>,

    /// Hardware profile.
    #[serde(default)]
    pub hardware_profile: HardwareProfile,

    /// Client name used for the display-attention lock.
    #[serde(default = "default_display_lock_client")]
    pub display_lock_client: String,
}

fn default_first_use_app() -> String {
    "org.webosports.app.firstuse".to_string()
}

fn default_launcher_app() -> String {
    "com.palm.launcher".to_string()
}

fn default_display_lock_client() -> String {
    "org.webosports.bootmgr".to_string()
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            first_use_app: default_first_use_app(),
            setup_apps: Vec::new(),
            launcher_app: default_launcher_app(),
            system_ui_app: None,
            boot_apps: Vec::new(),
            hardware_profile: HardwareProfile::default(),
            display_lock_client: default_display_lock_client(),
        }
    }
}

/// Process supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Delay between SIGTERM and SIGKILL on a kill request.
    #[serde(default = "default_termination_grace")]
    #[serde(with = "humantime_serde")]
    pub termination_grace: Duration,

    /// How long shutdown waits for native children before SIGKILL.
    #[serde(default = "default_shutdown_grace")]
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Extra environment for every native child.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

const fn default_termination_grace() -> Duration {
    Duration::from_millis(500)
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(2)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            termination_grace: default_termination_grace(),
            shutdown_grace: default_shutdown_grace(),
            environment: BTreeMap::new(),
        }
    }
}

/// Memory admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Quota enforcement tick.
    #[serde(default = "default_sample_interval")]
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Consecutive violations before a process becomes a kill candidate.
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,

    /// How often the low-memory report is logged while the state is not
    /// Normal.
    #[serde(default = "default_report_interval")]
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// How often `/proc/meminfo` is polled for the system memory state.
    #[serde(default = "default_pressure_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub pressure_poll_interval: Duration,

    /// Available memory at or below which the state is Medium.
    #[serde(default = "default_medium_available_mb")]
    pub medium_available_mb: u64,

    /// Available memory at or below which the state is Low.
    #[serde(default = "default_low_available_mb")]
    pub low_available_mb: u64,

    /// Available memory at or below which the state is Critical.
    #[serde(default = "default_critical_available_mb")]
    pub critical_available_mb: u64,

    /// Exempt the daemon itself from the kernel OOM killer.
    #[serde(default = "default_protect_self")]
    pub protect_self: bool,
}

const fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_violation_threshold() -> u32 {
    1
}

const fn default_report_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_pressure_poll_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_medium_available_mb() -> u64 {
    96
}

const fn default_low_available_mb() -> u64 {
    64
}

const fn default_critical_available_mb() -> u64 {
    32
}

const fn default_protect_self() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            violation_threshold: default_violation_threshold(),
            report_interval: default_report_interval(),
            pressure_poll_interval: default_pressure_poll_interval(),
            medium_available_mb: default_medium_available_mb(),
            low_available_mb: default_low_available_mb(),
            critical_available_mb: default_critical_available_mb(),
            protect_self: default_protect_self(),
        }
    }
}

/// Web runtime delegate connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    /// Unix socket of the web runtime.
    #[serde(default = "default_delegate_socket")]
    pub socket: PathBuf,

    /// Deadline for a single request/reply exchange. Also used by the bus
    /// client.
    #[serde(default = "default_call_timeout")]
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Reconnect pacing.
    #[serde(default)]
    pub reconnect: BackoffConfig,
}

fn default_delegate_socket() -> PathBuf {
    PathBuf::from("/var/run/sysmgr/webappmgr.sock")
}

const fn default_call_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            socket: default_delegate_socket(),
            call_timeout: default_call_timeout(),
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
