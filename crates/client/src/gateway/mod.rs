//! Remote gateway: the boundary between the sync engine and the server.
//!
//! Every call fails in one of two ways, and the engine treats them very
//! differently:
//! - [`GatewayError::Disconnected`]: the request never reached the server.
//!   The engine falls back to local persistence.
//! - [`GatewayError::Rejected`]: the server answered and refused. The error is
//!   surfaced to the caller and nothing is written locally.

use async_trait::async_trait;
use rolodex_core::Record;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{AuthToken, PushEvent};

mod http;

pub use http::{HttpGateway, HttpGatewayConfig};

/// Gateway call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("server unreachable: {0}")]
    Disconnected(String),
    #[error("request rejected{}: {detail}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected { status: Option<u16>, detail: String },
}

impl GatewayError {
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self::Disconnected(detail.into())
    }

    pub fn rejected(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, GatewayError::Disconnected(_))
    }
}

/// Stream of push events.
///
/// Dropping the subscription tears down whatever feeds it.
#[derive(Debug)]
pub struct PushSubscription {
    rx: mpsc::Receiver<PushEvent>,
    feeder: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// A subscription fed by a plain channel (tests, in-process servers).
    pub fn from_channel(rx: mpsc::Receiver<PushEvent>) -> Self {
        Self { rx, feeder: None }
    }

    /// A subscription fed by a background task that is aborted on drop.
    pub fn with_feeder(rx: mpsc::Receiver<PushEvent>, feeder: JoinHandle<()>) -> Self {
        Self {
            rx,
            feeder: Some(feeder),
        }
    }

    /// Next event, or `None` once the feeding side has closed.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// Remote record service.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn fetch_all(&self, auth: &AuthToken) -> Result<Vec<Record>, GatewayError>;

    /// Create `record`; the returned copy carries the server-assigned id.
    async fn create(&self, auth: &AuthToken, record: &Record) -> Result<Record, GatewayError>;

    async fn update(&self, auth: &AuthToken, record: &Record) -> Result<Record, GatewayError>;

    async fn delete(&self, auth: &AuthToken, record: &Record) -> Result<(), GatewayError>;

    /// Open the push channel.
    async fn subscribe(&self, auth: &AuthToken) -> Result<PushSubscription, GatewayError>;
}
