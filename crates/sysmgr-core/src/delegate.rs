//! Interface to the out-of-process web runtime.
//!
//! The runtime is the sole source of truth for which web applications are
//! running. The supervisor calls into it through [`RuntimeDelegate`] and
//! learns about its connectivity and app start/close events as
//! [`LoopEvent`](crate::event::LoopEvent)s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::process::ProcessId;

/// A web launch, correlated with the runtime by the pre-allocated process id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebLaunchRequest {
    /// Application id.
    pub app_id: String,
    /// Process id the supervisor allocated for this launch.
    pub process_id: ProcessId,
    /// Entry document from the descriptor.
    pub entry_point: String,
    /// Launch parameters, passed through verbatim.
    pub params: String,
    /// Application that asked for the launch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launching_app_id: Option<String>,
}

/// Window a URL launch opens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowType {
    /// Regular application card.
    #[default]
    Card,
    /// The launcher overlay.
    Launcher,
    /// Dashboard notification area.
    Dashboard,
    /// Modal popup alert.
    PopupAlert,
    /// Banner alert.
    BannerAlert,
    /// Status bar.
    StatusBar,
}

/// A URL opened directly in the runtime, outside any installed
/// application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlLaunchRequest {
    /// Document to open.
    pub url: String,
    /// Window to open it in.
    #[serde(default)]
    pub window_type: WindowType,
    /// Process id the supervisor allocated for this launch.
    pub process_id: ProcessId,
    /// Launch parameters, passed through verbatim.
    pub params: String,
    /// Application that asked for the launch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launching_app_id: Option<String>,
}

/// Which of the runtime's memory caches to drop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// Every cache in the runtime.
    #[default]
    All,
    /// Caches of one web instance.
    Process(ProcessId),
    /// Caches of every instance of one application.
    App(String),
}

/// One entry of the runtime's running-application snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAppEntry {
    /// Application id.
    pub app_id: String,
    /// Process id the runtime reports for it.
    pub process_id: ProcessId,
}

/// Calls into the web runtime. Every call may fail with a
/// [`TransportError`]; none of them block the event loop.
#[async_trait]
pub trait RuntimeDelegate: Send + Sync {
    /// Starts a web application.
    async fn launch_web(&self, request: WebLaunchRequest) -> Result<(), TransportError>;

    /// Closes a web application.
    async fn kill_web(&self, process_id: ProcessId) -> Result<(), TransportError>;

    /// Hands new parameters to a running web application.
    async fn relaunch_web(&self, app_id: String, params: String) -> Result<(), TransportError>;

    /// Lists every running web application.
    async fn list_running(&self) -> Result<Vec<WebAppEntry>, TransportError>;

    /// Opens a URL in a new runtime window.
    async fn launch_url(&self, request: UrlLaunchRequest) -> Result<(), TransportError>;

    /// Drops cached memory, typically under memory pressure.
    async fn clear_memory_caches(&self, scope: CacheScope) -> Result<(), TransportError>;
}
