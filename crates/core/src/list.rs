//! The in-memory record list.

use serde::Serialize;

use crate::error::{DomainError, DomainResult};
use crate::id::RecordId;
use crate::record::Record;

/// Ordered collection of records, unique by id.
///
/// New records go to the head; known ids are overwritten where they sit, so
/// positions are stable across updates and merges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RecordList {
    records: Vec<Record>,
}

impl RecordList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from a server/local snapshot, keeping the first occurrence
    /// of any repeated id and dropping records without an id.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut list = Self::new();
        for record in records {
            let Some(id) = record.id.as_ref() else {
                continue;
            };
            if list.position(id).is_none() {
                list.records.push(record);
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.position(id).map(|idx| &self.records[idx])
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.position(id).is_some()
    }

    /// Insert at head, or overwrite in place when the id is already present.
    pub fn upsert(&mut self, record: Record) -> DomainResult<()> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| DomainError::invariant("cannot list a record without an id"))?;
        match self.position(&id) {
            Some(idx) => {
                self.records[idx] = record;
            }
            None => self.records.insert(0, record),
        }
        Ok(())
    }

    /// Swap the entry keyed by `previous` for `record`, keeping its position.
    ///
    /// Used when a surrogate id is exchanged for the server id. If another
    /// entry already carries the new id (e.g. a push event won the race) it is
    /// dropped so the id stays unique. Falls back to [`RecordList::upsert`]
    /// when `previous` is not listed.
    pub fn replace(&mut self, previous: &RecordId, record: Record) -> DomainResult<()> {
        let new_id = record
            .id
            .clone()
            .ok_or_else(|| DomainError::invariant("cannot list a record without an id"))?;
        if previous == &new_id {
            return self.upsert(record);
        }
        let Some(mut idx) = self.position(previous) else {
            return self.upsert(record);
        };
        if let Some(dup) = self.position(&new_id) {
            self.records.remove(dup);
            if dup < idx {
                idx -= 1;
            }
        }
        self.records[idx] = record;
        Ok(())
    }

    /// Remove by id, returning the removed record.
    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        self.position(id).map(|idx| self.records.remove(idx))
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.id.as_ref() == Some(id))
    }
}

impl IntoIterator for RecordList {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
