//! The async sync engine.
//!
//! [`SyncEngine`] hosts a [`SyncCore`] behind a mutex and supplies everything
//! the core leaves to its host: the clock, remote calls bounded by a timeout,
//! the periodic timer, reactions to settled connectivity changes and the
//! durable copy of the queue.
//!
//! The core's `begin_flush` checks and sets the `Syncing` state in one call
//! under the lock, so the periodic, reactive, manual and submit triggers can
//! race freely: at most one flush runs, the others return `Ok(None)`.
//!
//! Flushes and submits run on their own tasks. A caller that stops waiting
//! (a dropped HTTP request, a timeout) does not cancel them halfway.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use moi_engine::{
    Dispatch, Error as EngineError, FlushReport, FlushTrigger, LocalId, LocalRecord,
    PendingWrite, RecordId, RecordRef, RecordState, RejectedWrite, RemoteCall, RetryPolicy, Route,
    SyncCore, SyncStatus, Timestamp, ToggleResult, WriteOutcome,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::db::QueueStore;
use crate::error::{AppError, Result};
use crate::remote::{self, RemoteStore};

/// Capacity of the event channel; slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 64;

/// Timing and retry knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Period of the recurring flush; the first tick fires at start.
    pub sync_interval: Duration,
    /// Upper bound on each remote call.
    pub remote_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Things observers may want to hear about besides the status itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    FlushFinished { report: FlushReport },
    WriteRejected { write: RejectedWrite },
}

/// Answer to a submitted write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub local_id: LocalId,
    pub state: RecordState,
}

/// Epoch milliseconds read once at startup and advanced by the tokio clock,
/// so timestamps never run backwards.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin_ms: Timestamp,
    origin: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin_ms: chrono::Utc::now().timestamp_millis().max(0) as Timestamp,
            origin: Instant::now(),
        }
    }

    fn now(&self) -> Timestamp {
        self.origin_ms + self.origin.elapsed().as_millis() as Timestamp
    }
}

struct Inner {
    core: Mutex<SyncCore>,
    clock: Clock,
    remote: Arc<dyn RemoteStore>,
    store: Option<QueueStore>,
    network: watch::Receiver<bool>,
    /// Held from routing to settling, so a direct write finishes before the
    /// next write is routed.
    submit_gate: tokio::sync::Mutex<()>,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    settings: EngineSettings,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Process-wide sync engine. Clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Create an engine with an in-memory queue.
    ///
    /// `network` is the settled connectivity signal; its current value seeds
    /// the status.
    pub fn new(
        network: watch::Receiver<bool>,
        remote: Arc<dyn RemoteStore>,
        settings: EngineSettings,
    ) -> Self {
        Self::build(network, remote, None, settings)
    }

    /// Create an engine whose queue is mirrored in `store`, restoring
    /// whatever the previous session left there.
    pub async fn open(
        network: watch::Receiver<bool>,
        remote: Arc<dyn RemoteStore>,
        store: QueueStore,
        settings: EngineSettings,
    ) -> Result<Self> {
        let persisted = store.load().await?;
        let engine = Self::build(network, remote, Some(store), settings);

        if !persisted.writes.is_empty() {
            tracing::info!(
                pending = persisted.writes.len(),
                "Restored queued writes from previous session"
            );
        }
        {
            let mut core = engine.core();
            core.restore(persisted.writes, persisted.ids);
            engine.publish(&core);
        }

        Ok(engine)
    }

    fn build(
        network: watch::Receiver<bool>,
        remote: Arc<dyn RemoteStore>,
        store: Option<QueueStore>,
        settings: EngineSettings,
    ) -> Self {
        let core = SyncCore::new(*network.borrow(), settings.retry);
        let (status, _) = watch::channel(core.status());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                clock: Clock::start(),
                remote,
                store,
                network,
                submit_gate: tokio::sync::Mutex::new(()),
                status,
                events,
                settings,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the periodic timer and the connectivity watcher.
    pub fn start(&self) {
        let periodic = tokio::spawn(self.clone().run_periodic());
        let network = tokio::spawn(self.clone().watch_network());
        self.tasks().extend([periodic, network]);
        tracing::info!(
            interval_secs = self.inner.settings.sync_interval.as_secs(),
            "Sync engine started"
        );
    }

    /// Stop the periodic timer and the connectivity watcher. A flush already
    /// running keeps going on its own task; if the runtime stops first, its
    /// drained writes survive only in the persisted queue.
    pub fn shutdown(&self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }

    /// Snapshot of the current status.
    pub fn current_status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Receiver for flush reports and rejected writes.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Local copies of the records in `collection`, oldest first.
    pub fn records(&self, collection: &str) -> Vec<LocalRecord> {
        self.core()
            .records()
            .list(collection)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Create a record. Online it goes straight to the remote store; offline
    /// it is applied locally and queued.
    pub async fn enqueue_if_offline(
        &self,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<Submitted> {
        let now = self.now();
        let write = PendingWrite::create(LocalId::new(now), collection, payload, now)?;
        self.submit(write).await
    }

    /// Replace the record `target` with `payload`.
    pub async fn update(
        &self,
        collection: &str,
        target: RecordRef,
        payload: serde_json::Value,
    ) -> Result<Submitted> {
        let now = self.now();
        let write = PendingWrite::update(LocalId::new(now), collection, target, payload, now)?;
        self.submit(write).await
    }

    /// Delete the record `target`.
    pub async fn delete(&self, collection: &str, target: RecordRef) -> Result<Submitted> {
        let now = self.now();
        let write = PendingWrite::delete(LocalId::new(now), collection, target, now)?;
        self.submit(write).await
    }

    /// Send `write` directly when nothing is ahead of it, queue it otherwise.
    pub async fn submit(&self, write: PendingWrite) -> Result<Submitted> {
        let engine = self.clone();
        detached(async move { engine.submit_in_order(write).await }).await
    }

    async fn submit_in_order(&self, write: PendingWrite) -> Result<Submitted> {
        let _gate = self.inner.submit_gate.lock().await;
        let local_id = write.local_id().clone();
        let route = self.core().route(&write)?;

        let state = match route {
            Route::Direct(call) => self.submit_direct(write, call).await?,
            Route::Queue { kick_flush } => {
                self.persist_insert(&write).await;
                let state = {
                    let mut core = self.core();
                    let state = core.enqueue(write);
                    self.publish(&core);
                    state
                };
                if kick_flush {
                    self.spawn_flush(FlushTrigger::Submit);
                }
                state
            }
        };

        tracing::debug!(local_id = %local_id, pending = state.is_pending(), "Write submitted");
        Ok(Submitted { local_id, state })
    }

    async fn submit_direct(&self, write: PendingWrite, call: RemoteCall) -> Result<RecordState> {
        let outcome = self.call_remote(&call).await;
        let falls_back = matches!(
            outcome,
            WriteOutcome::Unavailable { .. } | WriteOutcome::Deferred
        );
        if falls_back {
            tracing::warn!(local_id = %write.local_id(), "Direct write failed, queueing it");
            self.persist_insert(&write).await;
        }

        let created = write.kind().is_create().then(|| write.local_id().clone());
        let state = {
            let mut core = self.core();
            let state = core.settle_direct(write, outcome);
            self.publish(&core);
            state?
        };

        if let (Some(local_id), RecordState::Acknowledged { id }) = (created, &state) {
            self.persist_id(&local_id, id).await;
        }
        Ok(state)
    }

    /// Flush on the user's request. Offline this fails with
    /// [`EngineError::NotOnline`] and changes nothing.
    pub async fn manual_sync(&self) -> Result<Option<FlushReport>> {
        if !self.core().is_online() {
            return Err(EngineError::NotOnline.into());
        }
        self.flush(FlushTrigger::Manual).await
    }

    /// Flip manual offline mode. Coming back online with writes waiting
    /// flushes them before returning.
    pub async fn toggle_manual_offline(&self) -> Result<ToggleResult> {
        let reachable_now = *self.inner.network.borrow();
        let result = {
            let mut core = self.core();
            let result = core.toggle_manual_offline(reachable_now);
            self.publish(&core);
            result
        };

        tracing::info!(
            manual_offline = result.manual_offline,
            reachable = reachable_now,
            "Manual offline mode toggled"
        );

        if result.should_flush {
            self.flush(FlushTrigger::ToggleOnline).await?;
        }
        Ok(result)
    }

    /// Drop the queue, local records and persisted rows (logout).
    pub async fn reset(&self) -> Result<()> {
        {
            let mut core = self.core();
            core.reset();
            self.publish(&core);
        }
        if let Some(store) = &self.inner.store {
            store.clear().await?;
        }
        tracing::info!("Sync session reset");
        Ok(())
    }

    /// Run one flush unless a guard says no; `Ok(None)` means it was skipped.
    pub async fn flush(&self, trigger: FlushTrigger) -> Result<Option<FlushReport>> {
        let engine = self.clone();
        detached(async move { engine.run_flush(trigger).await }).await
    }

    async fn run_flush(&self, trigger: FlushTrigger) -> Result<Option<FlushReport>> {
        let begun = {
            let mut core = self.core();
            let begun = core.begin_flush(trigger, self.now());
            if begun.is_ok() {
                self.publish(&core);
            }
            begun
        };
        let mut batch = match begun {
            Ok(batch) => batch,
            Err(skip) => {
                tracing::trace!(?trigger, ?skip, "Flush skipped");
                return Ok(None);
            }
        };

        tracing::info!(?trigger, entries = batch.len(), "Flush started");

        for index in 0..batch.len() {
            let outcome = match batch.dispatch(index) {
                Dispatch::Send(call) => self.call_remote(&call).await,
                Dispatch::Defer => WriteOutcome::Deferred,
                Dispatch::Reject(reason) => WriteOutcome::Rejected { reason },
            };
            if let WriteOutcome::Unavailable { reason } = &outcome {
                tracing::warn!(index, "Remote store unavailable: {}", reason);
            }
            batch.record(index, outcome);
        }

        let (report, ids, retried) = {
            let mut core = self.core();
            let report = core.finish_flush(batch, self.now())?;
            self.publish(&core);

            let ids: Vec<(LocalId, RecordId)> = report
                .acknowledged
                .iter()
                .filter(|ack| core.remote_id(&ack.local_id) == Some(&ack.id))
                .map(|ack| (ack.local_id.clone(), ack.id.clone()))
                .collect();
            let retried: Vec<PendingWrite> = core
                .queue()
                .iter()
                .filter(|write| write.retry_count() > 0)
                .cloned()
                .collect();
            (report, ids, retried)
        };

        self.persist_flush(&report, &ids, &retried).await;

        tracing::info!(
            ?trigger,
            acknowledged = report.acknowledged.len(),
            rejected = report.rejected.len(),
            requeued = report.requeued,
            deferred = report.deferred,
            "Flush finished"
        );

        for rejected in &report.rejected {
            tracing::warn!(
                local_id = %rejected.local_id,
                collection = %rejected.collection,
                "Write rejected: {}",
                rejected.reason
            );
            let _ = self.inner.events.send(SyncEvent::WriteRejected {
                write: rejected.clone(),
            });
        }
        let _ = self.inner.events.send(SyncEvent::FlushFinished {
            report: report.clone(),
        });

        Ok(Some(report))
    }

    /// Apply a settled connectivity value and flush on reconnect.
    pub async fn apply_connectivity(&self, reachable: bool) -> Result<()> {
        let change = {
            let mut core = self.core();
            let change = core.set_reachable(reachable);
            self.publish(&core);
            change
        };

        if change.became_offline {
            tracing::info!("Sync engine offline");
        }
        if change.became_online {
            tracing::info!(flush = change.should_flush, "Sync engine back online");
        }
        if change.should_flush {
            self.flush(FlushTrigger::Reconnect).await?;
        }
        Ok(())
    }

    async fn run_periodic(self) {
        let mut ticker = tokio::time::interval(self.inner.settings.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.flush(FlushTrigger::Periodic).await {
                tracing::error!("Periodic flush failed: {}", e);
            }
        }
    }

    async fn watch_network(self) {
        let mut network = self.inner.network.clone();
        while network.changed().await.is_ok() {
            let reachable = *network.borrow_and_update();
            if let Err(e) = self.apply_connectivity(reachable).await {
                tracing::error!("Reconnect flush failed: {}", e);
            }
        }
        tracing::debug!("Connectivity signal closed");
    }

    fn spawn_flush(&self, trigger: FlushTrigger) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_flush(trigger).await {
                tracing::error!(?trigger, "Flush failed: {}", e);
            }
        });
    }

    async fn call_remote(&self, call: &RemoteCall) -> WriteOutcome {
        let timeout = self.inner.settings.remote_timeout;
        let request = remote::execute(self.inner.remote.as_ref(), call);
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => remote::outcome(result),
            Err(_) => WriteOutcome::Unavailable {
                reason: format!("no answer within {timeout:?}"),
            },
        }
    }

    async fn persist_insert(&self, write: &PendingWrite) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.insert(write).await {
                tracing::error!(local_id = %write.local_id(), "Failed to persist queued write: {}", e);
            }
        }
    }

    async fn persist_id(&self, local_id: &LocalId, id: &RecordId) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_id(local_id, id).await {
                tracing::error!(local_id = %local_id, "Failed to persist record id: {}", e);
            }
        }
    }

    async fn persist_flush(&self, report: &FlushReport, ids: &[(LocalId, RecordId)], retried: &[PendingWrite]) {
        let Some(store) = &self.inner.store else {
            return;
        };

        let settled = report
            .acknowledged
            .iter()
            .map(|ack| &ack.local_id)
            .chain(report.rejected.iter().map(|rejected| &rejected.local_id));
        for local_id in settled {
            if let Err(e) = store.remove(local_id).await {
                tracing::error!(local_id = %local_id, "Failed to drop persisted write: {}", e);
            }
        }
        for (local_id, id) in ids {
            self.persist_id(local_id, id).await;
        }
        for write in retried {
            if let Err(e) = store.update(write).await {
                tracing::error!(local_id = %write.local_id(), "Failed to persist retry count: {}", e);
            }
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    fn core(&self) -> MutexGuard<'_, SyncCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the status while the core is still locked, so snapshots go
    /// out in the order the transitions happened.
    fn publish(&self, core: &SyncCore) {
        self.inner.status.send_replace(core.status());
    }
}

/// Run `task` on its own tokio task and wait for it. Dropping the returned
/// future leaves the task running.
async fn detached<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(task)
        .await
        .map_err(|e| AppError::Internal(format!("sync task ended early: {e}")))?
}
