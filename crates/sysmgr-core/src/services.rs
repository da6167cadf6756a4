//! Outbound session services: account creation, the configurator, the
//! display-attention lock and terminated-application notices.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Tells the application catalog an application was terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationNotice {
    /// Default launch point title (may be empty).
    pub title: String,
    /// Menu name, `"Application"` when unknown.
    pub app_name: String,
    /// Application id.
    pub app_id: String,
}

/// Calls made by the boot sequencer and the supervisor. Failures are
/// logged by the caller and never change control flow.
#[async_trait]
pub trait SessionServices: Send + Sync {
    /// Asks the account service to create the local account.
    async fn create_local_account(&self) -> Result<(), TransportError>;

    /// Runs the configurator and waits for it to finish.
    async fn run_configurator(&self) -> Result<(), TransportError>;

    /// Publishes a terminated-application notice.
    async fn post_application_terminated(
        &self,
        notice: TerminationNotice,
    ) -> Result<(), TransportError>;

    /// Takes the exclusive display-attention lock.
    async fn acquire_display_lock(&self, client: String) -> Result<(), TransportError>;

    /// Releases the display-attention lock.
    async fn release_display_lock(&self, client: String) -> Result<(), TransportError>;
}
