//! The record model: a fixed core schema (id, status) plus opaque domain fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DomainError;
use crate::id::RecordId;

/// Synchronization tag carried by every record.
///
/// Serialized as its integer code (`0..=3`) to match the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SyncStatus {
    /// Confirmed by the server.
    #[default]
    Synced,
    /// Created locally; the server has never seen it.
    PendingCreate,
    /// Edited locally; the server holds an older version.
    PendingUpdate,
    /// Deleted locally; the server still holds it.
    PendingDelete,
}

impl SyncStatus {
    pub fn code(self) -> u8 {
        match self {
            SyncStatus::Synced => 0,
            SyncStatus::PendingCreate => 1,
            SyncStatus::PendingUpdate => 2,
            SyncStatus::PendingDelete => 3,
        }
    }

    pub fn is_pending(self) -> bool {
        self != SyncStatus::Synced
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingCreate => "pending_create",
            SyncStatus::PendingUpdate => "pending_update",
            SyncStatus::PendingDelete => "pending_delete",
        }
    }
}

impl TryFrom<u8> for SyncStatus {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SyncStatus::Synced),
            1 => Ok(SyncStatus::PendingCreate),
            2 => Ok(SyncStatus::PendingUpdate),
            3 => Ok(SyncStatus::PendingDelete),
            other => Err(DomainError::validation(format!("unknown sync status {other}"))),
        }
    }
}

impl From<SyncStatus> for u8 {
    fn from(value: SyncStatus) -> Self {
        value.code()
    }
}

impl core::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contact-like record.
///
/// Only `id` and `status` are interpreted by the engine. Everything else
/// (`nume`, `telefon`, `latitude`, ...) lives in `fields` and round-trips
/// untouched through the wire format and the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// A record that has never been stored anywhere.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: None,
            status: SyncStatus::Synced,
            fields,
        }
    }

    /// Build from a JSON object value; non-object values are rejected.
    pub fn from_fields(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(DomainError::validation(format!(
                "record fields must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// True when the record only exists on this device.
    pub fn is_local_only(&self) -> bool {
        match &self.id {
            None => true,
            Some(id) => id.is_surrogate(),
        }
    }
}
