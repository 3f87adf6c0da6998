//! The sync engine: an explicitly constructed, explicitly disposed handle that
//! owns the authoritative record list.
//!
//! All list mutations go through one dispatcher task. Operations do their
//! remote and store I/O on the caller's task, then send an [`Action`] and wait
//! for the dispatcher to acknowledge it. Two listener tasks feed the same
//! queue: one watching connectivity (reconnect triggers reconciliation), one
//! draining the push channel.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rolodex_core::{Record, RecordId, RecordList, SyncStatus};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{GatewayError, RemoteGateway};
use crate::offline::ConnectivityMonitor;
use crate::state::{Action, SyncState};
use crate::store::{RecordStore, StoreError};
use crate::types::{AuthToken, ConnectivityState, ReconcileReport};

struct Envelope {
    action: Action,
    ack: oneshot::Sender<()>,
}

/// Shared by the handle and the listener tasks.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) gateway: Arc<dyn RemoteGateway>,
    pub(crate) token: AuthToken,
    pub(crate) reconciling: AtomicBool,
    /// Held while a local entry is written and its list action dispatched, so
    /// store and list move together.
    pub(crate) local_writes: AsyncMutex<()>,
    connectivity: ConnectivityMonitor,
    actions: mpsc::Sender<Envelope>,
    state: watch::Receiver<SyncState>,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
}

impl EngineCore {
    /// Queue `action` and wait until the dispatcher has applied it.
    pub(crate) async fn dispatch(&self, action: Action) -> EngineResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(EngineError::Disposed);
        }
        let (ack, applied) = oneshot::channel();
        self.actions
            .send(Envelope { action, ack })
            .await
            .map_err(|_| EngineError::Disposed)?;
        applied.await.map_err(|_| EngineError::Disposed)
    }

    /// Run a gateway call under the configured timeout; elapsed counts as disconnected.
    pub(crate) async fn remote<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.config.remote_timeout, "remote call timed out");
                Err(GatewayError::disconnected(format!("{op} timed out")))
            }
        }
    }

    /// Record `err` through `action` and hand it back.
    async fn fail<T>(&self, action: fn(EngineError) -> Action, err: EngineError) -> EngineResult<T> {
        self.dispatch(action(err.clone())).await?;
        Err(err)
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    fn fresh_surrogate(&self) -> RecordId {
        let state = self.state.borrow();
        RecordId::surrogate_avoiding(|id| state.records.contains(id))
    }

    /// Drop or refresh the local entry for a record the server now holds.
    pub(crate) async fn retire_entry(&self, id: &RecordId, confirmed: &Record) -> Result<(), StoreError> {
        if self.config.keep_synced_copies {
            self.store.put(id, confirmed).await
        } else {
            self.store.remove(id).await
        }
    }

    async fn fetch(&self) -> EngineResult<()> {
        self.ensure_live()?;
        self.dispatch(Action::FetchStarted).await?;

        match self.remote("fetch_all", self.gateway.fetch_all(&self.token)).await {
            Ok(records) => {
                tracing::debug!(count = records.len(), "fetched records");
                let records = records
                    .into_iter()
                    .map(|r| r.with_status(SyncStatus::Synced))
                    .collect();
                let _writes = self.local_writes.lock().await;
                let pending = match self.store.list_all().await {
                    Ok(entries) => entries
                        .into_iter()
                        .filter(|(_, r)| r.status.is_pending())
                        .map(|(id, r)| r.with_id(id))
                        .collect::<Vec<_>>(),
                    Err(err) => {
                        tracing::error!("reading pending entries failed: {err}");
                        return self.fail(Action::FetchFailed, err.into()).await;
                    }
                };
                self.dispatch(Action::FetchSucceeded {
                    records,
                    pending,
                    from_local_store: false,
                })
                .await
            }
            Err(GatewayError::Disconnected(reason)) => {
                tracing::warn!(%reason, "server unreachable, listing local entries");
                match self.store.list_all().await {
                    Ok(entries) => {
                        let records = entries.into_iter().map(|(id, r)| r.with_id(id)).collect();
                        self.dispatch(Action::FetchSucceeded {
                            records,
                            pending: Vec::new(),
                            from_local_store: true,
                        })
                        .await
                    }
                    Err(err) => {
                        tracing::error!("local fallback read failed: {err}");
                        self.fail(Action::FetchFailed, err.into()).await
                    }
                }
            }
            Err(rejected) => self.fail(Action::FetchFailed, EngineError::Rejected(rejected)).await,
        }
    }

    async fn save(&self, record: Record, network: ConnectivityState) -> EngineResult<Record> {
        self.ensure_live()?;
        self.dispatch(Action::SaveStarted).await?;

        if network.is_online() {
            match self.save_remote(&record).await {
                Ok(saved) => return Ok(saved),
                Err(RemoteOutcome::Offline(reason)) => {
                    tracing::warn!(%reason, "save falling back to local store");
                }
                Err(RemoteOutcome::Failed(err)) => return self.fail(Action::SaveFailed, err).await,
            }
        }

        let (id, status) = match &record.id {
            None => (self.fresh_surrogate(), SyncStatus::PendingCreate),
            Some(id) if id.is_surrogate() => (id.clone(), SyncStatus::PendingCreate),
            Some(id) => (id.clone(), SyncStatus::PendingUpdate),
        };
        let pending = record.with_id(id.clone()).with_status(status);
        let _writes = self.local_writes.lock().await;
        if let Err(err) = self.store.put(&id, &pending).await {
            tracing::error!(%id, "failed to persist pending save: {err}");
            return self.fail(Action::SaveFailed, err.into()).await;
        }
        tracing::info!(%id, status = %status, "saved locally");
        self.dispatch(Action::SaveSucceeded(pending.clone())).await?;
        Ok(pending)
    }

    async fn save_remote(&self, record: &Record) -> Result<Record, RemoteOutcome> {
        let surrogate = record.id.clone().filter(RecordId::is_surrogate);
        let mut payload = record.clone().with_status(SyncStatus::Synced);

        let result = if record.is_local_only() {
            payload.id = None;
            self.remote("create", self.gateway.create(&self.token, &payload)).await
        } else {
            self.remote("update", self.gateway.update(&self.token, &payload)).await
        };

        let mut saved = match result {
            Ok(saved) => saved.with_status(SyncStatus::Synced),
            Err(GatewayError::Disconnected(reason)) => return Err(RemoteOutcome::Offline(reason)),
            Err(rejected) => return Err(RemoteOutcome::Failed(EngineError::Rejected(rejected))),
        };
        if saved.id.is_none() {
            saved.id = payload.id.clone();
        }
        let Some(id) = saved.id.clone() else {
            let err = GatewayError::rejected(None, "server returned a record without identifier");
            return Err(RemoteOutcome::Failed(EngineError::Rejected(err)));
        };

        let _writes = self.local_writes.lock().await;
        let action = match surrogate {
            Some(previous) => Action::SaveReplaced {
                previous,
                record: saved.clone(),
            },
            None => Action::SaveSucceeded(saved.clone()),
        };
        self.dispatch(action).await.map_err(RemoteOutcome::Failed)?;

        let cleanup = async {
            if let Some(previous) = record.id.as_ref().filter(|prev| **prev != id) {
                self.store.remove(previous).await?;
            }
            self.retire_entry(&id, &saved).await
        };
        if let Err(err) = cleanup.await {
            tracing::error!(%id, "saved remotely but local cleanup failed: {err}");
            return Err(RemoteOutcome::Failed(err.into()));
        }
        tracing::info!(%id, "saved remotely");
        Ok(saved)
    }

    async fn delete(&self, record: Record, network: ConnectivityState) -> EngineResult<()> {
        self.ensure_live()?;
        self.dispatch(Action::DeleteStarted).await?;

        let Some(id) = record.id.clone() else {
            return self.fail(Action::DeleteFailed, EngineError::MissingIdentifier).await;
        };

        if id.is_surrogate() {
            // Never reached the server; nothing to delete remotely.
            let _writes = self.local_writes.lock().await;
            if let Err(err) = self.store.remove(&id).await {
                return self.fail(Action::DeleteFailed, err.into()).await;
            }
            tracing::info!(%id, "discarded local-only record");
            return self.dispatch(Action::DeleteSucceeded(id)).await;
        }

        if network.is_online() {
            let payload = record.clone().with_status(SyncStatus::Synced);
            match self.remote("delete", self.gateway.delete(&self.token, &payload)).await {
                Ok(()) => {
                    let _writes = self.local_writes.lock().await;
                    if let Err(err) = self.store.remove(&id).await {
                        tracing::error!(%id, "deleted remotely but local cleanup failed: {err}");
                        return self.fail(Action::DeleteFailed, err.into()).await;
                    }
                    tracing::info!(%id, "deleted remotely");
                    return self.dispatch(Action::DeleteSucceeded(id)).await;
                }
                Err(GatewayError::Disconnected(reason)) => {
                    tracing::warn!(%reason, "delete falling back to local store");
                }
                Err(rejected) => {
                    return self
                        .fail(Action::DeleteFailed, EngineError::Rejected(rejected))
                        .await;
                }
            }
        }

        let tombstone = record.with_status(SyncStatus::PendingDelete);
        let _writes = self.local_writes.lock().await;
        if let Err(err) = self.store.put(&id, &tombstone).await {
            tracing::error!(%id, "failed to persist pending delete: {err}");
            return self.fail(Action::DeleteFailed, err.into()).await;
        }
        tracing::info!(%id, "delete deferred");
        self.dispatch(Action::DeleteDeferred(tombstone)).await
    }
}

enum RemoteOutcome {
    /// Take the local fallback path.
    Offline(String),
    Failed(EngineError),
}

/// Background tasks owned by the engine; aborted if never disposed.
struct EngineTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineTasks {
    fn take(&self) -> Vec<JoinHandle<()>> {
        match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Drop for EngineTasks {
    fn drop(&mut self) {
        for handle in self.take() {
            handle.abort();
        }
    }
}

/// Handle to a running sync engine. Clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    core: Arc<EngineCore>,
    tasks: Arc<EngineTasks>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.core.config)
            .field("disposed", &self.core.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Start the dispatcher and both listeners. Must be called inside a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: ConnectivityMonitor,
        token: AuthToken,
    ) -> Self {
        let (actions, queue) = mpsc::channel(config.dispatch_capacity.max(1));
        let (state_tx, state) = watch::channel(SyncState::new());
        let (shutdown, _) = watch::channel(false);

        let core = Arc::new(EngineCore {
            config,
            store,
            gateway,
            token,
            reconciling: AtomicBool::new(false),
            local_writes: AsyncMutex::new(()),
            connectivity,
            actions,
            state,
            shutdown,
            disposed: AtomicBool::new(false),
        });

        let dispatcher = tokio::spawn(run_dispatcher(queue, state_tx, core.shutdown.subscribe()));
        let reconnects = tokio::spawn(watch_connectivity(
            core.clone(),
            core.connectivity.state(),
            core.connectivity.subscribe(),
            core.shutdown.subscribe(),
        ));
        let push = tokio::spawn(drain_push(
            core.clone(),
            core.connectivity.subscribe(),
            core.shutdown.subscribe(),
        ));
        tracing::info!(initial = ?core.connectivity.state(), "sync engine started");

        Self {
            core,
            tasks: Arc::new(EngineTasks {
                // Listeners first so they stop feeding the queue before the dispatcher goes.
                handles: Mutex::new(vec![reconnects, push, dispatcher]),
            }),
        }
    }

    /// Load the record list from the server, or from local entries when it is unreachable.
    pub async fn fetch(&self) -> EngineResult<()> {
        self.core.fetch().await
    }

    /// Create or update `record`. Returns the record as it now appears in the list.
    ///
    /// `network` is the caller's view of connectivity; `Offline` skips the
    /// remote attempt entirely.
    pub async fn save(&self, record: Record, network: ConnectivityState) -> EngineResult<Record> {
        self.core.save(record, network).await
    }

    /// Delete `record`. Offline deletes leave it listed as `PendingDelete`.
    pub async fn delete(&self, record: Record, network: ConnectivityState) -> EngineResult<()> {
        self.core.delete(record, network).await
    }

    /// Replay pending local entries against the server now.
    pub async fn reconcile(&self) -> EngineResult<ReconcileReport> {
        self.core.ensure_live()?;
        self.core.reconcile().await
    }

    pub fn snapshot(&self) -> SyncState {
        self.core.state.borrow().clone()
    }

    pub fn records(&self) -> RecordList {
        self.core.state.borrow().records.clone()
    }

    /// Observe every applied action.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.core.state.clone()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.core.connectivity
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    /// Stop the listeners and the dispatcher. Idempotent; every later
    /// operation returns [`EngineError::Disposed`].
    pub async fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("disposing sync engine");
        self.core.shutdown.send_replace(true);
        for handle in self.tasks.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::error!("engine task panicked: {err}");
                }
            }
        }
        tracing::info!("sync engine disposed");
    }
}

async fn run_dispatcher(
    mut queue: mpsc::Receiver<Envelope>,
    state: watch::Sender<SyncState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => {
                let Some(Envelope { action, ack }) = next else {
                    break;
                };
                tracing::debug!(action = action.name(), "applying action");
                state.send_modify(|s| s.apply(action));
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

async fn watch_connectivity(
    core: Arc<EngineCore>,
    mut previous: ConnectivityState,
    mut connectivity: watch::Receiver<ConnectivityState>,
    mut shutdown: watch::Receiver<bool>,
) {
    if previous.is_online() {
        // Entries left over from an earlier session have no reconnect edge to wait for.
        tracing::info!("starting online, reconciling leftover entries");
        tokio::select! {
            _ = shutdown.changed() => return,
            outcome = core.reconcile() => match outcome {
                Ok(report) => tracing::info!(
                    applied = report.applied(),
                    failed = report.failed.len(),
                    skipped = report.skipped,
                    "startup reconciliation finished"
                ),
                Err(EngineError::Disposed) => return,
                Err(err) => tracing::error!("startup reconciliation failed: {err}"),
            },
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *connectivity.borrow_and_update();
                let reconnected = previous == ConnectivityState::Offline && current.is_online();
                previous = current;
                if !reconnected {
                    continue;
                }
                tracing::info!("connectivity restored, reconciling");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    outcome = core.reconcile() => match outcome {
                        Ok(report) => tracing::info!(
                            applied = report.applied(),
                            failed = report.failed.len(),
                            skipped = report.skipped,
                            "reconnect reconciliation finished"
                        ),
                        Err(EngineError::Disposed) => break,
                        Err(err) => tracing::error!("reconnect reconciliation failed: {err}"),
                    },
                }
            }
        }
    }
    tracing::debug!("connectivity listener stopped");
}

async fn drain_push(
    core: Arc<EngineCore>,
    mut connectivity: watch::Receiver<ConnectivityState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if connectivity.borrow_and_update().is_online() {
            let opened = tokio::select! {
                _ = shutdown.changed() => return,
                opened = core.remote("subscribe", core.gateway.subscribe(&core.token)) => opened,
            };
            match opened {
                Ok(mut subscription) => {
                    tracing::info!("push subscription active");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            event = subscription.recv() => {
                                let Some(event) = event else {
                                    tracing::warn!("push channel ended");
                                    break;
                                };
                                tracing::debug!(kind = ?event.kind, id = ?event.record.id, "push event");
                                if core.dispatch(Action::PushReceived(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(err) => tracing::warn!("push subscription unavailable, retrying on reconnect: {err}"),
            }
        }

        // Wait for the next transition that leaves us online.
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if connectivity.borrow().is_online() {
                        break;
                    }
                }
            }
        }
    }
}
