//! Shared types for the sync engine and its collaborators.

use chrono::{DateTime, Utc};
use rolodex_core::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and connected to the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}

impl ConnectivityState {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

/// Bearer token presented to the remote service.
///
/// `Debug` is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Kind of change announced by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    Created,
    Updated,
}

/// A change pushed by the server outside any request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: PushKind,
    #[serde(rename = "payload")]
    pub record: Record,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `(surrogate id, server id)` for each replayed create.
    pub created: Vec<(RecordId, RecordId)>,
    pub updated: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
    /// Entries saved or deleted again while their replay was in flight; the
    /// newer local copy stays pending for the next pass.
    pub superseded: Vec<RecordId>,
    /// Entries whose remote call failed; they stay pending.
    pub failed: Vec<(RecordId, String)>,
    /// Entries that could not be parsed; left untouched.
    pub malformed: Vec<RecordId>,
    /// True when another pass was already running and this one did nothing.
    pub skipped: bool,
}

impl ReconcileReport {
    pub(crate) fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            superseded: Vec::new(),
            failed: Vec::new(),
            malformed: Vec::new(),
            skipped: false,
        }
    }

    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::begin()
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Number of entries retired against the server.
    pub fn applied(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}
