//! Synchronization state machine.
//!
//! [`SyncState`] is the single authoritative copy of the record list plus the
//! progress/error flags of each operation kind. It is only ever changed by
//! [`SyncState::apply`], and only the engine's dispatcher calls that, one
//! action at a time.

use chrono::{DateTime, Utc};
use rolodex_core::{Record, RecordId, RecordList, SyncStatus};

use crate::error::EngineError;
use crate::types::{PushEvent, ReconcileReport};

/// Lifecycle of the most recent operation of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpPhase {
    #[default]
    Idle,
    Started,
    Succeeded,
    /// The server rejected the request.
    FailedRemote,
    /// Local persistence failed.
    FailedLocal,
}

impl OpPhase {
    fn failed(err: &EngineError) -> Self {
        match err {
            EngineError::StoreFailure(_) => OpPhase::FailedLocal,
            _ => OpPhase::FailedRemote,
        }
    }
}

/// A list change produced by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileChange {
    /// A pending create was accepted; `previous` is the surrogate id.
    Created { previous: RecordId, record: Record },
    Updated(Record),
    Deleted(RecordId),
}

/// Everything that can change [`SyncState`].
#[derive(Debug, Clone)]
pub enum Action {
    FetchStarted,
    FetchSucceeded {
        records: Vec<Record>,
        /// Unconfirmed local copies laid over `records`; they win by id.
        pending: Vec<Record>,
        /// The list was rebuilt from the local store because the server was unreachable.
        from_local_store: bool,
    },
    FetchFailed(EngineError),
    SaveStarted,
    SaveSucceeded(Record),
    /// A record saved under a surrogate id now has its server id.
    SaveReplaced { previous: RecordId, record: Record },
    SaveFailed(EngineError),
    DeleteStarted,
    DeleteSucceeded(RecordId),
    /// The delete was recorded locally; the record stays listed as pending.
    DeleteDeferred(Record),
    DeleteFailed(EngineError),
    PushReceived(PushEvent),
    ReconcileStarted,
    Reconciled(ReconcileChange),
    ReconcileFinished(ReconcileReport),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::FetchStarted => "fetch_started",
            Action::FetchSucceeded { .. } => "fetch_succeeded",
            Action::FetchFailed(_) => "fetch_failed",
            Action::SaveStarted => "save_started",
            Action::SaveSucceeded(_) => "save_succeeded",
            Action::SaveReplaced { .. } => "save_replaced",
            Action::SaveFailed(_) => "save_failed",
            Action::DeleteStarted => "delete_started",
            Action::DeleteSucceeded(_) => "delete_succeeded",
            Action::DeleteDeferred(_) => "delete_deferred",
            Action::DeleteFailed(_) => "delete_failed",
            Action::PushReceived(_) => "push_received",
            Action::ReconcileStarted => "reconcile_started",
            Action::Reconciled(_) => "reconciled",
            Action::ReconcileFinished(_) => "reconcile_finished",
        }
    }
}

/// Authoritative in-memory state.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub records: RecordList,
    pub fetch: OpPhase,
    pub fetching_error: Option<EngineError>,
    pub save: OpPhase,
    pub saving_error: Option<EngineError>,
    pub delete: OpPhase,
    pub deleting_error: Option<EngineError>,
    pub reconciling: bool,
    /// The list was last loaded from the local store, not the server.
    pub degraded: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_reconcile: Option<ReconcileReport>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch == OpPhase::Started
    }

    pub fn is_saving(&self) -> bool {
        self.save == OpPhase::Started
    }

    /// Records carrying a pending tag.
    pub fn pending(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.status.is_pending())
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::FetchStarted => {
                self.fetch = OpPhase::Started;
                self.fetching_error = None;
            }
            Action::FetchSucceeded {
                records,
                pending,
                from_local_store,
            } => {
                self.records = RecordList::from_records(records);
                for record in pending {
                    self.merge(record);
                }
                self.fetch = OpPhase::Succeeded;
                self.degraded = from_local_store;
                if !from_local_store {
                    self.last_synced_at = Some(Utc::now());
                }
            }
            Action::FetchFailed(err) => {
                self.fetch = OpPhase::failed(&err);
                self.fetching_error = Some(err);
            }
            Action::SaveStarted => {
                self.save = OpPhase::Started;
                self.saving_error = None;
            }
            Action::SaveSucceeded(record) => {
                self.merge(record);
                self.save = OpPhase::Succeeded;
            }
            Action::SaveReplaced { previous, record } => {
                self.swap(&previous, record);
                self.save = OpPhase::Succeeded;
            }
            Action::SaveFailed(err) => {
                self.save = OpPhase::failed(&err);
                self.saving_error = Some(err);
            }
            Action::DeleteStarted => {
                self.delete = OpPhase::Started;
                self.deleting_error = None;
            }
            Action::DeleteSucceeded(id) => {
                self.records.remove(&id);
                self.delete = OpPhase::Succeeded;
            }
            Action::DeleteDeferred(record) => {
                // Pending deletes stay visible until reconciliation removes them remotely.
                self.merge(record);
                self.delete = OpPhase::Succeeded;
            }
            Action::DeleteFailed(err) => {
                self.delete = OpPhase::failed(&err);
                self.deleting_error = Some(err);
            }
            Action::PushReceived(event) => {
                let mut record = event.record;
                record.status = SyncStatus::Synced;
                self.merge(record);
            }
            Action::ReconcileStarted => {
                self.reconciling = true;
            }
            Action::Reconciled(change) => match change {
                ReconcileChange::Created { previous, record } => self.swap(&previous, record),
                ReconcileChange::Updated(record) => self.merge(record),
                ReconcileChange::Deleted(id) => {
                    self.records.remove(&id);
                }
            },
            Action::ReconcileFinished(report) => {
                self.reconciling = false;
                if report.applied() > 0 && report.failed.is_empty() {
                    self.last_synced_at = Some(report.finished_at);
                }
                self.last_reconcile = Some(report);
            }
        }
    }

    fn merge(&mut self, record: Record) {
        if let Err(err) = self.records.upsert(record) {
            tracing::error!("dropping unmergeable record: {err}");
        }
    }

    fn swap(&mut self, previous: &RecordId, record: Record) {
        if let Err(err) = self.records.replace(previous, record) {
            tracing::error!("dropping unmergeable record: {err}");
        }
    }
}
