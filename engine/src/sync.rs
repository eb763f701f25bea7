//! The sync state machine.
//!
//! [`SyncCore`] owns the pending-write queue, the optimistic local records
//! and every input of [`SyncStatus`]. It never performs IO and never reads a
//! clock: hosts pass `now` in and carry out the remote calls a
//! [`FlushBatch`] asks for.
//!
//! ## States
//!
//! `Idle → Syncing` happens only in [`SyncCore::begin_flush`], which refuses
//! while a flush is in flight or while offline. `Syncing → Idle` happens only
//! in [`SyncCore::finish_flush`], whatever the per-entry results were. Hosts
//! that keep the core behind a lock get at-most-one-flush-in-flight for free
//! because the check and the transition happen in one call.

use crate::{
    error::Result,
    flush::{Acknowledgement, FlushBatch, FlushReport, FlushTrigger, RejectedWrite, WriteOutcome},
    write::RecordRef,
    Error, LocalId, LocalRecord, PendingWrite, PendingWriteQueue, RecordBook, RecordId,
    RecordState, RemoteCall, RetryPolicy, SyncState, SyncStatus, Timestamp, WriteKind,
};
use std::collections::{HashMap, HashSet};

/// Why [`SyncCore::begin_flush`] declined to start a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSkip {
    AlreadySyncing,
    Offline,
    Empty,
    /// Periodic flushes wait until `until` after failures.
    BackingOff { until: Timestamp },
}

/// Where a newly submitted write should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Send straight to the remote store.
    Direct(RemoteCall),
    /// Queue it; if `kick_flush`, start a flush right away.
    Queue { kick_flush: bool },
}

/// Effect of a settled connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkChange {
    pub became_online: bool,
    pub became_offline: bool,
    /// Offline → online with writes waiting and no manual override.
    pub should_flush: bool,
}

/// Effect of the manual offline toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleResult {
    pub manual_offline: bool,
    pub should_flush: bool,
}

/// Queue, local records and status inputs for one client session.
#[derive(Debug, Clone)]
pub struct SyncCore {
    queue: PendingWriteQueue,
    records: RecordBook,
    id_map: HashMap<LocalId, RecordId>,
    rejected_creates: HashSet<LocalId>,
    reachable: bool,
    manual_offline: bool,
    state: SyncState,
    in_flight: usize,
    last_sync: Option<Timestamp>,
    retry: RetryPolicy,
    consecutive_failures: u32,
    next_attempt_at: Option<Timestamp>,
    generation: u64,
}

impl SyncCore {
    /// Create a core seeded with the startup reachability snapshot.
    pub fn new(reachable: bool, retry: RetryPolicy) -> Self {
        Self {
            queue: PendingWriteQueue::new(),
            records: RecordBook::new(),
            id_map: HashMap::new(),
            rejected_creates: HashSet::new(),
            reachable,
            manual_offline: false,
            state: SyncState::Idle,
            in_flight: 0,
            last_sync: None,
            retry,
            consecutive_failures: 0,
            next_attempt_at: None,
            generation: 0,
        }
    }

    /// Consistent snapshot for observers.
    pub fn status(&self) -> SyncStatus {
        SyncStatus::new(
            self.is_online(),
            self.last_sync,
            self.queue.len() + self.in_flight,
            self.state,
            self.manual_offline,
        )
    }

    /// Reachable and not forced offline.
    pub fn is_online(&self) -> bool {
        self.reachable && !self.manual_offline
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn queue(&self) -> &PendingWriteQueue {
        &self.queue
    }

    pub fn records(&self) -> &RecordBook {
        &self.records
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Earliest time the periodic trigger may flush after failures.
    pub fn next_attempt_at(&self) -> Option<Timestamp> {
        self.next_attempt_at
    }

    /// Remote id assigned to a locally created record.
    pub fn remote_id(&self, local_id: &LocalId) -> Option<&RecordId> {
        self.id_map.get(local_id)
    }

    /// Apply a settled connectivity value from the network monitor.
    pub fn set_reachable(&mut self, reachable: bool) -> NetworkChange {
        let was_online = self.is_online();
        self.reachable = reachable;
        let online = self.is_online();

        NetworkChange {
            became_online: !was_online && online,
            became_offline: was_online && !online,
            should_flush: !was_online && online && !self.queue.is_empty(),
        }
    }

    /// Flip manual offline mode.
    ///
    /// Going offline forces the status offline regardless of the network.
    /// Coming back clears the override, adopts `reachable_now` and asks for
    /// a flush if that leaves the client online with writes waiting.
    pub fn toggle_manual_offline(&mut self, reachable_now: bool) -> ToggleResult {
        if self.is_online() {
            self.manual_offline = true;
            return ToggleResult {
                manual_offline: true,
                should_flush: false,
            };
        }

        self.manual_offline = false;
        self.reachable = reachable_now;
        ToggleResult {
            manual_offline: false,
            should_flush: self.is_online() && !self.queue.is_empty(),
        }
    }

    /// Decide whether `write` can go straight to the remote store.
    ///
    /// Direct sends only happen online, while idle, with an empty queue, so
    /// queued writes are never overtaken.
    pub fn route(&self, write: &PendingWrite) -> Result<Route> {
        let target_id = match write.kind().target() {
            None => None,
            Some(RecordRef::Remote(id)) => Some(id.clone()),
            Some(RecordRef::Local(local_id)) => match self.id_map.get(local_id) {
                Some(id) => Some(id.clone()),
                None if self.create_pending(local_id) => None,
                None => return Err(Error::RecordNotFound(local_id.to_string())),
            },
        };

        let direct = self.is_online() && self.state == SyncState::Idle && self.queue.is_empty();
        match RemoteCall::for_write(write, target_id) {
            Some(call) if direct => Ok(Route::Direct(call)),
            _ => Ok(Route::Queue {
                kick_flush: self.is_online(),
            }),
        }
    }

    /// Append `write` to the queue and apply it to the local records.
    pub fn enqueue(&mut self, write: PendingWrite) -> RecordState {
        self.apply_locally(&write, None);
        let state = match write.kind().target() {
            Some(RecordRef::Remote(id)) => RecordState::Acknowledged { id: id.clone() },
            _ => RecordState::PendingLocal {
                local_id: write.local_id().clone(),
            },
        };
        self.queue.enqueue(write);
        state
    }

    /// Settle a write that was sent directly.
    ///
    /// Unavailable writes fall back to the queue. Rejected writes leave no
    /// trace and are reported to the caller.
    pub fn settle_direct(&mut self, write: PendingWrite, outcome: WriteOutcome) -> Result<RecordState> {
        match outcome {
            WriteOutcome::Acknowledged { id } => {
                self.apply_locally(&write, Some(id.clone()));
                Ok(RecordState::Acknowledged { id })
            }
            WriteOutcome::Unavailable { .. } | WriteOutcome::Deferred => Ok(self.enqueue(write)),
            WriteOutcome::Rejected { reason } => Err(Error::WriteRejected(reason)),
        }
    }

    /// Start a flush if the guards allow it.
    pub fn begin_flush(
        &mut self,
        trigger: FlushTrigger,
        now: Timestamp,
    ) -> std::result::Result<FlushBatch, FlushSkip> {
        if self.state == SyncState::Syncing {
            return Err(FlushSkip::AlreadySyncing);
        }
        if !self.is_online() {
            return Err(FlushSkip::Offline);
        }
        if self.queue.is_empty() {
            return Err(FlushSkip::Empty);
        }
        if trigger.respects_backoff() {
            if let Some(until) = self.next_attempt_at {
                if now < until {
                    return Err(FlushSkip::BackingOff { until });
                }
            }
        }

        self.state = SyncState::Syncing;
        let writes = self.queue.drain();
        self.in_flight = writes.len();

        Ok(FlushBatch::new(
            self.generation,
            trigger,
            now,
            writes,
            self.id_map.clone(),
            self.rejected_creates.clone(),
        ))
    }

    /// Finish the running flush and fold its results back in.
    ///
    /// Acknowledged and rejected entries leave the queue for good. Unavailable
    /// entries get their retry count bumped and go back to the head of the
    /// queue, ahead of writes enqueued during the flush.
    pub fn finish_flush(&mut self, batch: FlushBatch, now: Timestamp) -> Result<FlushReport> {
        if self.state != SyncState::Syncing {
            return Err(Error::NoFlushInProgress);
        }
        self.state = SyncState::Idle;
        self.in_flight = 0;

        let mut report = FlushReport {
            trigger: batch.trigger(),
            started_at: batch.started_at(),
            finished_at: now.max(batch.started_at()),
            attempted: batch.len(),
            acknowledged: Vec::new(),
            rejected: Vec::new(),
            requeued: 0,
            deferred: 0,
        };

        // The session was reset while this flush ran.
        if batch.generation != self.generation {
            return Ok(report);
        }

        let mut requeue = Vec::new();
        for (mut write, outcome) in batch.into_results() {
            match outcome {
                WriteOutcome::Acknowledged { id } => {
                    if write.kind().is_create() {
                        self.records.acknowledge(write.local_id(), id.clone());
                        self.id_map.insert(write.local_id().clone(), id.clone());
                    }
                    report.acknowledged.push(Acknowledgement {
                        local_id: write.local_id().clone(),
                        collection: write.collection().clone(),
                        id,
                    });
                }
                WriteOutcome::Rejected { reason } => {
                    report.rejected.push(self.reject(write, reason));
                }
                WriteOutcome::Unavailable { reason } => {
                    write.record_failure();
                    if self.retry.exhausted(write.retry_count()) {
                        let reason =
                            format!("gave up after {} attempts: {reason}", write.retry_count());
                        report.rejected.push(self.reject(write, reason));
                    } else {
                        report.requeued += 1;
                        requeue.push(write);
                    }
                }
                WriteOutcome::Deferred => {
                    report.deferred += 1;
                    requeue.push(write);
                }
            }
        }
        self.queue.restore_front(requeue);

        if report.succeeded() {
            self.last_sync = Some(report.finished_at);
            self.consecutive_failures = 0;
            self.next_attempt_at = None;
        } else if report.requeued > 0 {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.next_attempt_at = Some(
                self.retry
                    .next_attempt_at(report.finished_at, self.consecutive_failures),
            );
        }

        Ok(report)
    }

    /// Restore persisted state at startup: queued writes in order and the
    /// ids already assigned to local records.
    pub fn restore(
        &mut self,
        writes: impl IntoIterator<Item = PendingWrite>,
        ids: impl IntoIterator<Item = (LocalId, RecordId)>,
    ) {
        self.id_map.extend(ids);
        for write in writes {
            self.enqueue(write);
        }
    }

    /// Drop everything tied to the session (logout).
    pub fn reset(&mut self) {
        self.queue.clear();
        self.records.clear();
        self.id_map.clear();
        self.rejected_creates.clear();
        self.in_flight = 0;
        self.last_sync = None;
        self.consecutive_failures = 0;
        self.next_attempt_at = None;
        self.generation += 1;
    }

    fn create_pending(&self, local_id: &LocalId) -> bool {
        self.records
            .get(local_id)
            .is_some_and(|record| record.state.is_pending())
    }

    fn local_target(&self, target: &RecordRef) -> Option<LocalId> {
        match target {
            RecordRef::Local(local_id) => Some(local_id.clone()),
            RecordRef::Remote(id) => self.records.find_remote(id).map(|r| r.local_id.clone()),
        }
    }

    fn apply_locally(&mut self, write: &PendingWrite, acknowledged: Option<RecordId>) {
        match write.kind() {
            WriteKind::Create => {
                let local_id = write.local_id().clone();
                let record = match acknowledged {
                    Some(id) => {
                        self.id_map.insert(local_id.clone(), id.clone());
                        LocalRecord::acknowledged(
                            local_id,
                            write.collection().clone(),
                            write.payload().clone(),
                            write.created_at(),
                            id,
                        )
                    }
                    None => LocalRecord::pending(
                        local_id,
                        write.collection().clone(),
                        write.payload().clone(),
                        write.created_at(),
                    ),
                };
                self.records.insert(record);
            }
            WriteKind::Update { target } => {
                if let Some(local_id) = self.local_target(target) {
                    self.records
                        .replace_payload(&local_id, write.payload().clone());
                }
            }
            WriteKind::Delete { target } => {
                if let Some(local_id) = self.local_target(target) {
                    self.records.remove(&local_id);
                }
            }
        }
    }

    fn reject(&mut self, write: PendingWrite, reason: String) -> RejectedWrite {
        if write.kind().is_create() {
            self.records.remove(write.local_id());
            self.rejected_creates.insert(write.local_id().clone());
        }
        RejectedWrite {
            local_id: write.local_id().clone(),
            collection: write.collection().clone(),
            kind: write.kind().clone(),
            reason,
            retry_count: write.retry_count(),
        }
    }
}

impl Default for SyncCore {
    /// No connectivity signal yet: assume online.
    fn default() -> Self {
        Self::new(true, RetryPolicy::default())
    }
}
