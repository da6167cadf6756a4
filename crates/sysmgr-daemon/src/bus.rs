//! Session bus client: one JSON-line request per call, one reply line back.
//!
//! Each bus service listens on `<bus_dir>/<service>.sock`. A missing or
//! refusing socket means the service is not up yet and is reported as
//! [`TransportError::Unavailable`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sysmgr_core::TransportError;
use sysmgr_core::ipc::{BusReply, BusRequest, encode_line};
use sysmgr_core::services::{SessionServices, TerminationNotice};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::line::read_line;

/// Account service; creates the local profile during first use.
pub const ACCOUNTS_SERVICE: &str = "com.palm.service.accounts";
/// Database and file-cache configurator.
pub const CONFIGURATOR_SERVICE: &str = "com.palm.configurator";
/// Display power manager.
pub const DISPLAY_SERVICE: &str = "com.palm.display";
/// System UI notifications.
pub const SYSTEM_UI_SERVICE: &str = "com.palm.systemui";

/// [`SessionServices`] over the session bus.
#[derive(Debug, Clone)]
pub struct BusClient {
    bus_dir: PathBuf,
    timeout: Duration,
}

impl BusClient {
    /// Creates a client for services under `bus_dir`.
    #[must_use]
    pub fn new(bus_dir: &Path, timeout: Duration) -> Self {
        Self {
            bus_dir: bus_dir.to_path_buf(),
            timeout,
        }
    }

    /// Socket path of a service.
    #[must_use]
    pub fn service_socket(&self, service: &str) -> PathBuf {
        self.bus_dir.join(format!("{service}.sock"))
    }

    /// Calls `method` on `service` and waits for its reply.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        params: Value,
    ) -> Result<(), TransportError> {
        let request = BusRequest {
            method: method.to_string(),
            params,
        };
        tokio::time::timeout(self.timeout, self.exchange(service, &request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn exchange(&self, service: &str, request: &BusRequest) -> Result<(), TransportError> {
        let socket = self.service_socket(service);
        let stream = UnixStream::connect(&socket)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                    TransportError::unavailable(service)
                },
                _ => TransportError::Io(error),
            })?;
        debug!(service, method = %request.method, "bus call");

        let (read, mut write) = stream.into_split();
        write.write_all(&encode_line(request)?).await?;

        let mut reader = BufReader::new(read);
        let mut reply = Vec::new();
        if read_line(&mut reader, &mut reply).await? == 0 {
            return Err(TransportError::protocol(format!(
                "{service} closed the connection without replying"
            )));
        }
        BusReply::parse(&reply)
    }
}

#[async_trait]
impl SessionServices for BusClient {
    async fn create_local_account(&self) -> Result<(), TransportError> {
        self.call(ACCOUNTS_SERVICE, "createLocalAccount", json!({}))
            .await
    }

    async fn run_configurator(&self) -> Result<(), TransportError> {
        self.call(CONFIGURATOR_SERVICE, "run", json!({})).await
    }

    async fn post_application_terminated(
        &self,
        notice: TerminationNotice,
    ) -> Result<(), TransportError> {
        let params = serde_json::to_value(notice)?;
        self.call(SYSTEM_UI_SERVICE, "applicationTerminated", params)
            .await
    }

    async fn acquire_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.call(DISPLAY_SERVICE, "acquireLock", json!({ "client": client }))
            .await
    }

    async fn release_display_lock(&self, client: String) -> Result<(), TransportError> {
        self.call(DISPLAY_SERVICE, "releaseLock", json!({ "client": client }))
            .await
    }
}
