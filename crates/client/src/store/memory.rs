use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rolodex_core::{Record, RecordId};

use super::{RecordStore, SESSION_KEY, StoreError, decode, encode, record_ids};
use crate::types::AuthToken;

/// In-memory record store for tests/dev.
///
/// Values are kept serialized, exactly as a persistent backend would hold
/// them, so corrupt entries can be planted with [`InMemoryRecordStore::insert_raw`].
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    entries: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an arbitrary raw value under `key`.
    pub fn insert_raw(&self, key: impl Into<String>, raw: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), raw.into());
        }
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Make every subsequent write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".to_string()));
        }
        Ok(())
    }

    fn write_raw(&self, key: String, raw: String) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        entries.insert(key, raw);
        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, id: &RecordId, record: &Record) -> Result<(), StoreError> {
        let raw = encode(id, record)?;
        self.write_raw(id.to_string(), raw)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
        if id.as_str() == SESSION_KEY {
            return Ok(None);
        }
        self.read_raw(id.as_str())?
            .map(|raw| decode(id.as_str(), &raw))
            .transpose()
    }

    async fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        if id.as_str() == SESSION_KEY {
            return Ok(());
        }
        self.delete_raw(id.as_str())
    }

    async fn list_ids(&self) -> Result<BTreeSet<RecordId>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(record_ids(entries.keys().map(String::as_str)))
    }

    async fn session_token(&self) -> Result<Option<AuthToken>, StoreError> {
        Ok(self.read_raw(SESSION_KEY)?.map(AuthToken::new))
    }

    async fn set_session_token(&self, token: &AuthToken) -> Result<(), StoreError> {
        self.write_raw(SESSION_KEY.to_string(), token.as_str().to_string())
    }

    async fn clear_session_token(&self) -> Result<(), StoreError> {
        self.delete_raw(SESSION_KEY)
    }
}
