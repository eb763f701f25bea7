//! Flush batches and their results.
//!
//! A flush drains the whole queue into a [`FlushBatch`]. The host walks the
//! batch in order: [`FlushBatch::dispatch`] tells it what to do with entry
//! `i`, the host performs the remote call and hands the result back through
//! [`FlushBatch::record`]. Creates acknowledged earlier in the batch resolve
//! the local targets of later updates and deletes.

use crate::{
    write::RecordRef, CollectionName, LocalId, PendingWrite, RecordId, RemoteCall, Timestamp,
    WriteKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushTrigger {
    /// Explicit user request.
    Manual,
    /// The recurring timer.
    Periodic,
    /// The network monitor reported offline → online.
    Reconnect,
    /// The user left manual offline mode.
    ToggleOnline,
    /// A write was submitted while online but behind a non-empty queue.
    Submit,
}

impl FlushTrigger {
    /// Only the periodic timer waits out retry backoff.
    pub fn respects_backoff(self) -> bool {
        matches!(self, FlushTrigger::Periodic)
    }
}

/// Result of handing one write to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WriteOutcome {
    /// Accepted; `id` is the remote id of the affected record.
    Acknowledged { id: RecordId },
    /// Transient failure; retry later.
    Unavailable { reason: String },
    /// Permanent failure; do not retry.
    Rejected { reason: String },
    /// Not attempted because its target has not been acknowledged yet.
    Deferred,
}

/// What the host should do with one batch entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Send(RemoteCall),
    Defer,
    Reject(String),
}

/// The writes drained for one flush, plus per-entry results.
#[derive(Debug, Clone)]
pub struct FlushBatch {
    pub(crate) generation: u64,
    trigger: FlushTrigger,
    started_at: Timestamp,
    writes: Vec<PendingWrite>,
    outcomes: Vec<Option<WriteOutcome>>,
    known: HashMap<LocalId, RecordId>,
    rejected_creates: HashSet<LocalId>,
    unresolved_creates: HashSet<LocalId>,
}

impl FlushBatch {
    pub(crate) fn new(
        generation: u64,
        trigger: FlushTrigger,
        started_at: Timestamp,
        writes: Vec<PendingWrite>,
        known: HashMap<LocalId, RecordId>,
        rejected_creates: HashSet<LocalId>,
    ) -> Self {
        let outcomes = vec![None; writes.len()];
        Self {
            generation,
            trigger,
            started_at,
            writes,
            outcomes,
            known,
            rejected_creates,
            unresolved_creates: HashSet::new(),
        }
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Writes in FIFO order.
    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    /// Decide what to do with entry `index`.
    pub fn dispatch(&self, index: usize) -> Dispatch {
        let Some(write) = self.writes.get(index) else {
            return Dispatch::Defer;
        };

        let target_id = match write.kind().target() {
            None => None,
            Some(RecordRef::Remote(id)) => Some(id.clone()),
            Some(RecordRef::Local(local_id)) => {
                if let Some(id) = self.known.get(local_id) {
                    Some(id.clone())
                } else if self.rejected_creates.contains(local_id) {
                    return Dispatch::Reject(format!("target record {local_id} was rejected"));
                } else if self.unresolved_creates.contains(local_id) {
                    return Dispatch::Defer;
                } else {
                    return Dispatch::Reject(format!("unknown local record {local_id}"));
                }
            }
        };

        match RemoteCall::for_write(write, target_id) {
            Some(call) => Dispatch::Send(call),
            None => Dispatch::Defer,
        }
    }

    /// Record the result for entry `index`.
    pub fn record(&mut self, index: usize, outcome: WriteOutcome) {
        let Some(write) = self.writes.get(index) else {
            return;
        };

        if write.kind().is_create() {
            let local_id = write.local_id().clone();
            match &outcome {
                WriteOutcome::Acknowledged { id } => {
                    self.known.insert(local_id, id.clone());
                }
                WriteOutcome::Rejected { .. } => {
                    self.rejected_creates.insert(local_id);
                }
                WriteOutcome::Unavailable { .. } | WriteOutcome::Deferred => {
                    self.unresolved_creates.insert(local_id);
                }
            }
        }

        self.outcomes[index] = Some(outcome);
    }

    /// Entries paired with their results. Unrecorded entries count as deferred.
    pub(crate) fn into_results(self) -> impl Iterator<Item = (PendingWrite, WriteOutcome)> {
        self.writes
            .into_iter()
            .zip(self.outcomes)
            .map(|(write, outcome)| (write, outcome.unwrap_or(WriteOutcome::Deferred)))
    }
}

/// A write the remote store accepted during a flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub local_id: LocalId,
    pub collection: CollectionName,
    pub id: RecordId,
}

/// A write dropped from the queue as a permanent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedWrite {
    pub local_id: LocalId,
    pub collection: CollectionName,
    pub kind: WriteKind,
    pub reason: String,
    pub retry_count: u32,
}

/// Summary of one completed flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Entries drained for this flush
    pub attempted: usize,
    pub acknowledged: Vec<Acknowledgement>,
    pub rejected: Vec<RejectedWrite>,
    /// Entries put back after a transient failure
    pub requeued: usize,
    /// Entries put back because their target is not acknowledged yet
    pub deferred: usize,
}

impl FlushReport {
    /// Every drained entry left the queue.
    pub fn succeeded(&self) -> bool {
        self.requeued == 0 && self.deferred == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(n: u64) -> PendingWrite {
        PendingWrite::create(LocalId::new(n), "events", json!({"n": n}), n).unwrap()
    }

    fn update_of(target: &PendingWrite, n: u64) -> PendingWrite {
        PendingWrite::update(
            LocalId::new(n),
            "events",
            RecordRef::Local(target.local_id().clone()),
            json!({"n": n}),
            n,
        )
        .unwrap()
    }

    fn batch(writes: Vec<PendingWrite>) -> FlushBatch {
        FlushBatch::new(0, FlushTrigger::Manual, 0, writes, HashMap::new(), HashSet::new())
    }

    #[test]
    fn update_after_acknowledged_create_resolves_target() {
        let create = create(1);
        let update = update_of(&create, 2);
        let mut batch = batch(vec![create, update]);

        assert!(matches!(batch.dispatch(0), Dispatch::Send(RemoteCall::Create { .. })));
        batch.record(0, WriteOutcome::Acknowledged { id: "ev-1".into() });

        match batch.dispatch(1) {
            Dispatch::Send(RemoteCall::Update { id, .. }) => assert_eq!(id, "ev-1"),
            other => panic!("expected update call, got {other:?}"),
        }
    }

    #[test]
    fn update_after_failed_create_is_deferred() {
        let create = create(1);
        let update = update_of(&create, 2);
        let mut batch = batch(vec![create, update]);

        batch.record(0, WriteOutcome::Unavailable { reason: "timeout".into() });
        assert_eq!(batch.dispatch(1), Dispatch::Defer);
    }

    #[test]
    fn update_after_rejected_create_is_rejected() {
        let create = create(1);
        let update = update_of(&create, 2);
        let mut batch = batch(vec![create, update]);

        batch.record(0, WriteOutcome::Rejected { reason: "invalid".into() });
        assert!(matches!(batch.dispatch(1), Dispatch::Reject(_)));
    }

    #[test]
    fn update_of_unknown_local_record_is_rejected() {
        let orphan = update_of(&create(1), 2);
        let batch = batch(vec![orphan]);
        assert!(matches!(batch.dispatch(0), Dispatch::Reject(_)));
    }

    #[test]
    fn unrecorded_entries_settle_as_deferred() {
        let batch = batch(vec![create(1), create(2)]);
        let results: Vec<_> = batch.into_results().map(|(_, o)| o).collect();
        assert_eq!(results, [WriteOutcome::Deferred, WriteOutcome::Deferred]);
    }

    #[test]
    fn only_periodic_respects_backoff() {
        assert!(FlushTrigger::Periodic.respects_backoff());
        assert!(!FlushTrigger::Manual.respects_backoff());
        assert!(!FlushTrigger::Reconnect.respects_backoff());
        assert!(!FlushTrigger::ToggleOnline.respects_backoff());
    }
}
