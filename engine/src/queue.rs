//! The pending-write queue: an ordered, in-memory FIFO of writes awaiting
//! remote acknowledgement.
//!
//! Entries are never coalesced or reordered. Two writes to the same record
//! are two independent entries.

use crate::{LocalId, PendingWrite};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// FIFO buffer of pending writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingWriteQueue {
    entries: VecDeque<PendingWrite>,
}

impl PendingWriteQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append a write to the tail.
    pub fn enqueue(&mut self, write: PendingWrite) {
        self.entries.push_back(write);
    }

    /// Take the full ordered content, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<PendingWrite> {
        self.entries.drain(..).collect()
    }

    /// Put writes back at the head, keeping their relative order and
    /// placing them ahead of anything enqueued since they were drained.
    pub fn restore_front(&mut self, writes: Vec<PendingWrite>) {
        for write in writes.into_iter().rev() {
            self.entries.push_front(write);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.entries.iter()
    }

    /// Whether a create for `local_id` is still queued.
    pub fn has_create_for(&self, local_id: &LocalId) -> bool {
        self.entries
            .iter()
            .any(|w| w.kind().is_create() && w.local_id() == local_id)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<PendingWrite> for PendingWriteQueue {
    fn from_iter<I: IntoIterator<Item = PendingWrite>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(n: u64, name: &str) -> PendingWrite {
        PendingWrite::create(LocalId::new(n), "events", json!({ "name": name }), n).unwrap()
    }

    fn names(writes: &[PendingWrite]) -> Vec<String> {
        writes
            .iter()
            .map(|w| w.payload()["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn drain_is_fifo_and_empties() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(create(1, "A"));
        queue.enqueue(create(2, "B"));
        queue.enqueue(create(3, "C"));
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(names(&drained), ["A", "B", "C"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn restore_front_goes_ahead_of_new_entries() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(create(1, "A"));
        queue.enqueue(create(2, "B"));
        let drained = queue.drain();

        queue.enqueue(create(3, "C"));
        queue.restore_front(drained);

        assert_eq!(names(&queue.drain()), ["A", "B", "C"]);
    }

    #[test]
    fn same_record_writes_are_not_coalesced() {
        let mut queue = PendingWriteQueue::new();
        let write = create(1, "A");
        queue.enqueue(write.clone());
        queue.enqueue(write);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn has_create_for() {
        let mut queue = PendingWriteQueue::new();
        let write = create(1, "A");
        let id = write.local_id().clone();
        queue.enqueue(write);

        assert!(queue.has_create_for(&id));
        assert!(!queue.has_create_for(&LocalId::new(2)));
    }
}
