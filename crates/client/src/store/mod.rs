//! Local persistence of records that still owe the server a change.
//!
//! The store is a flat key → serialized-record map. One key is reserved for
//! session data (the auth token) and is invisible to every record traversal.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rolodex_core::{Record, RecordId};

use crate::types::AuthToken;

mod memory;
mod sqlite;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// Reserved key holding session data rather than a record.
pub const SESSION_KEY: &str = "token";

/// Record store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend failed (I/O, SQL, lock poisoning).
    #[error("storage error: {0}")]
    Backend(String),
    /// A record could not be serialized for writing.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A persisted value could not be parsed back into a record.
    #[error("malformed entry '{key}': {reason}")]
    Malformed { key: String, reason: String },
    /// Attempted to store a record under the reserved session key.
    #[error("key '{0}' is reserved")]
    ReservedKey(String),
}

/// Keyed local persistence of pending records.
///
/// Every method completes before returning; callers await one store call
/// before issuing the next.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `record` under `id`, replacing whatever was there.
    async fn put(&self, id: &RecordId, record: &Record) -> Result<(), StoreError>;

    /// Read the record stored under `id`.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError>;

    /// Delete the entry for `id` (absent ids are fine).
    async fn remove(&self, id: &RecordId) -> Result<(), StoreError>;

    /// Every record key, excluding [`SESSION_KEY`].
    async fn list_ids(&self) -> Result<BTreeSet<RecordId>, StoreError>;

    async fn session_token(&self) -> Result<Option<AuthToken>, StoreError>;

    async fn set_session_token(&self, token: &AuthToken) -> Result<(), StoreError>;

    async fn clear_session_token(&self) -> Result<(), StoreError>;

    /// Every parseable record, in no particular order.
    ///
    /// Malformed entries are logged and skipped; backend failures propagate.
    async fn list_all(&self) -> Result<Vec<(RecordId, Record)>, StoreError> {
        let ids = self.list_ids().await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(Some(record)) => out.push((id, record)),
                Ok(None) => {}
                Err(StoreError::Malformed { key, reason }) => {
                    tracing::warn!(%key, %reason, "skipping malformed local entry");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

pub(crate) fn encode(id: &RecordId, record: &Record) -> Result<String, StoreError> {
    if id.as_str() == SESSION_KEY {
        return Err(StoreError::ReservedKey(SESSION_KEY.to_string()));
    }
    serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode(key: &str, raw: &str) -> Result<Record, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Keys are filtered here so the reserved key and unparseable ids never leak
/// into record traversals.
pub(crate) fn record_ids<'a>(keys: impl IntoIterator<Item = &'a str>) -> BTreeSet<RecordId> {
    keys.into_iter()
        .filter(|k| *k != SESSION_KEY)
        .filter_map(|k| RecordId::new(k).ok())
        .collect()
}
