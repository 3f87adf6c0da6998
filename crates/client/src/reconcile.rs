//! Reconciliation: replay pending local entries against the server.
//!
//! A pass walks every local entry, replays creates, then updates, then
//! deletes (ties broken by id), and retires each entry the server confirms.
//! Failures are per entry; the pass always runs to the end.

use std::sync::atomic::{AtomicBool, Ordering};

use rolodex_core::{Record, RecordId, SyncStatus};

use crate::engine::EngineCore;
use crate::error::EngineResult;
use crate::gateway::GatewayError;
use crate::state::{Action, ReconcileChange};
use crate::store::StoreError;
use crate::types::ReconcileReport;

/// Clears the single-flight flag when the pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replay order: creates, updates, deletes. Synced copies are not replayed.
fn replay_rank(status: SyncStatus) -> Option<u8> {
    match status {
        SyncStatus::PendingCreate => Some(0),
        SyncStatus::PendingUpdate => Some(1),
        SyncStatus::PendingDelete => Some(2),
        SyncStatus::Synced => None,
    }
}

/// Sort pending entries into replay order, dropping synced copies.
fn replay_order(entries: Vec<(RecordId, Record)>) -> Vec<(RecordId, Record)> {
    let mut pending: Vec<_> = entries
        .into_iter()
        .filter_map(|(id, record)| replay_rank(record.status).map(|rank| (rank, id, record)))
        .collect();
    pending.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    pending.into_iter().map(|(_, id, record)| (id, record)).collect()
}

/// How one entry fared.
enum EntryOutcome {
    /// Retired against the server; the change is already applied to the list.
    Applied(ReconcileChange),
    /// The entry changed while its replay was in flight; the newer copy stays pending.
    Superseded,
    NothingToReplay,
    Remote(GatewayError),
    Local(StoreError),
}

impl EngineCore {
    /// Run one reconciliation pass, or report `skipped` if one is already running.
    pub(crate) async fn reconcile(&self) -> EngineResult<ReconcileReport> {
        let Some(_flight) = InFlight::acquire(&self.reconciling) else {
            tracing::debug!("reconciliation already running");
            return Ok(ReconcileReport::skipped());
        };

        self.dispatch(Action::ReconcileStarted).await?;
        let mut report = ReconcileReport::begin();
        let drained = self.drain(&mut report).await;
        let report = report.finish();
        self.dispatch(Action::ReconcileFinished(report.clone())).await?;
        drained?;

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            superseded = report.superseded.len(),
            failed = report.failed.len(),
            malformed = report.malformed.len(),
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn drain(&self, report: &mut ReconcileReport) -> EngineResult<()> {
        let ids = self.store.list_ids().await?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get(&id).await {
                Ok(Some(record)) => entries.push((id, record)),
                Ok(None) => {}
                Err(StoreError::Malformed { key, reason }) => {
                    tracing::warn!(%key, %reason, "skipping malformed local entry");
                    report.malformed.push(id);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let pending = replay_order(entries);
        tracing::info!(pending = pending.len(), "replaying local entries");

        for (id, record) in pending {
            let status = record.status;
            match self.replay(&id, record).await? {
                EntryOutcome::Applied(ReconcileChange::Created { previous, record }) => {
                    if let Some(server_id) = record.id {
                        report.created.push((previous, server_id));
                    }
                }
                EntryOutcome::Applied(ReconcileChange::Updated(_)) => report.updated.push(id),
                EntryOutcome::Applied(ReconcileChange::Deleted(_)) => report.deleted.push(id),
                EntryOutcome::Superseded => {
                    tracing::info!(%id, status = %status, "entry changed during replay, newer copy kept");
                    report.superseded.push(id);
                }
                EntryOutcome::NothingToReplay => {}
                EntryOutcome::Remote(err) => {
                    tracing::warn!(%id, status = %status, "replay failed, entry kept: {err}");
                    report.failed.push((id, err.to_string()));
                }
                EntryOutcome::Local(err) => {
                    tracing::error!(%id, status = %status, "replayed but local entry not retired: {err}");
                    report.failed.push((id, err.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Send one entry to the server, then settle it locally under the write gate.
    ///
    /// The entry is re-read after the remote call: a save or delete that landed
    /// in the meantime wins, and the server's answer is not applied over it.
    async fn replay(&self, id: &RecordId, record: Record) -> EngineResult<EntryOutcome> {
        let confirmed = match record.status {
            SyncStatus::PendingCreate => {
                let mut payload = record.clone().with_status(SyncStatus::Synced);
                payload.id = None;
                self.remote("create", self.gateway.create(&self.token, &payload)).await
            }
            SyncStatus::PendingUpdate => {
                let payload = record.clone().with_id(id.clone()).with_status(SyncStatus::Synced);
                self.remote("update", self.gateway.update(&self.token, &payload)).await
            }
            SyncStatus::PendingDelete => {
                // Only the outgoing copy flips to Synced; the stored entry stays
                // PendingDelete until the server confirms.
                let payload = record.clone().with_id(id.clone()).with_status(SyncStatus::Synced);
                self.remote("delete", self.gateway.delete(&self.token, &payload))
                    .await
                    .map(|()| payload)
            }
            SyncStatus::Synced => return Ok(EntryOutcome::NothingToReplay),
        };
        let mut confirmed = match confirmed {
            Ok(confirmed) => confirmed.with_status(SyncStatus::Synced),
            Err(err) => return Ok(EntryOutcome::Remote(err)),
        };
        if record.status != SyncStatus::PendingCreate && confirmed.id.is_none() {
            confirmed.id = Some(id.clone());
        }
        let Some(server_id) = confirmed.id.clone() else {
            return Ok(EntryOutcome::Remote(GatewayError::rejected(
                None,
                "server returned a record without identifier",
            )));
        };

        let _writes = self.local_writes.lock().await;
        let settled = match record.status {
            SyncStatus::PendingCreate => self.settle_create(id, &record, confirmed, server_id).await,
            SyncStatus::PendingUpdate => self.settle_update(id, &record, confirmed).await,
            _ => self.settle_delete(id, &record).await,
        };
        match settled {
            Ok(Some(change)) => {
                self.dispatch(Action::Reconciled(change.clone())).await?;
                Ok(EntryOutcome::Applied(change))
            }
            Ok(None) => Ok(EntryOutcome::Superseded),
            Err(err) => Ok(EntryOutcome::Local(err)),
        }
    }

    async fn settle_create(
        &self,
        surrogate: &RecordId,
        replayed: &Record,
        created: Record,
        server_id: RecordId,
    ) -> Result<Option<ReconcileChange>, StoreError> {
        match self.store.get(surrogate).await? {
            Some(current) if current == *replayed => {
                self.store.remove(surrogate).await?;
                self.retire_entry(&server_id, &created).await?;
                Ok(Some(ReconcileChange::Created {
                    previous: surrogate.clone(),
                    record: created,
                }))
            }
            Some(edited) => {
                // The server now owns the record, so the newer local copy becomes its update.
                let status = match edited.status {
                    SyncStatus::PendingDelete => SyncStatus::PendingDelete,
                    _ => SyncStatus::PendingUpdate,
                };
                let moved = edited.with_id(server_id.clone()).with_status(status);
                self.store.put(&server_id, &moved).await?;
                self.store.remove(surrogate).await?;
                tracing::info!(%surrogate, %server_id, status = %status, "local edit moved onto created record");
                Ok(Some(ReconcileChange::Created {
                    previous: surrogate.clone(),
                    record: moved,
                }))
            }
            None => {
                // Discarded locally while the create was in flight.
                let orphan = created.with_status(SyncStatus::PendingDelete);
                self.store.put(&server_id, &orphan).await?;
                tracing::info!(%surrogate, %server_id, "queued delete for discarded create");
                Ok(None)
            }
        }
    }

    async fn settle_update(
        &self,
        id: &RecordId,
        replayed: &Record,
        updated: Record,
    ) -> Result<Option<ReconcileChange>, StoreError> {
        if self.store.get(id).await?.as_ref() != Some(replayed) {
            return Ok(None);
        }
        self.retire_entry(id, &updated).await?;
        Ok(Some(ReconcileChange::Updated(updated)))
    }

    async fn settle_delete(&self, id: &RecordId, replayed: &Record) -> Result<Option<ReconcileChange>, StoreError> {
        match self.store.get(id).await? {
            Some(current) if current == *replayed => self.store.remove(id).await?,
            Some(_) => return Ok(None),
            None => {}
        }
        Ok(Some(ReconcileChange::Deleted(id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, status: SyncStatus) -> (RecordId, Record) {
        let id = RecordId::new(id).unwrap();
        let record = Record::from_fields(json!({ "nume": id.as_str() }))
            .unwrap()
            .with_id(id.clone())
            .with_status(status);
        (id, record)
    }

    #[test]
    fn creates_then_updates_then_deletes() {
        let ordered = replay_order(vec![
            entry("9", SyncStatus::PendingDelete),
            entry("_bbbbbbbbb", SyncStatus::PendingCreate),
            entry("4", SyncStatus::PendingUpdate),
            entry("1", SyncStatus::PendingDelete),
            entry("_aaaaaaaaa", SyncStatus::PendingCreate),
            entry("5", SyncStatus::Synced),
        ]);
        let ids: Vec<&str> = ordered.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["_aaaaaaaaa", "_bbbbbbbbb", "4", "1", "9"]);
    }

    #[test]
    fn flight_flag_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let first = InFlight::acquire(&flag);
            assert!(first.is_some());
            assert!(InFlight::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlight::acquire(&flag).is_some());
    }
}
