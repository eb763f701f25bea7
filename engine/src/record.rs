//! Optimistic local copies of domain records.
//!
//! Each record carries exactly one of a remote id or a pending marker,
//! enforced by [`RecordState`].

use crate::{CollectionName, LocalId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether the remote store has acknowledged a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RecordState {
    /// The remote store assigned `id`.
    Acknowledged { id: RecordId },
    /// Only known locally; a create is queued.
    #[serde(rename_all = "camelCase")]
    PendingLocal { local_id: LocalId },
}

impl RecordState {
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordState::PendingLocal { .. })
    }

    /// The remote id, once acknowledged.
    pub fn remote_id(&self) -> Option<&RecordId> {
        match self {
            RecordState::Acknowledged { id } => Some(id),
            RecordState::PendingLocal { .. } => None,
        }
    }
}

/// A domain record as the client currently sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub local_id: LocalId,
    pub collection: CollectionName,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub state: RecordState,
}

impl LocalRecord {
    /// A record whose create is queued.
    pub fn pending(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        created_at: Timestamp,
    ) -> Self {
        Self {
            state: RecordState::PendingLocal {
                local_id: local_id.clone(),
            },
            local_id,
            collection: collection.into(),
            payload,
            created_at,
        }
    }

    /// A record the remote store accepted immediately.
    pub fn acknowledged(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        created_at: Timestamp,
        id: RecordId,
    ) -> Self {
        Self {
            local_id,
            collection: collection.into(),
            payload,
            created_at,
            state: RecordState::Acknowledged { id },
        }
    }
}

/// Local records keyed by [`LocalId`], iterated in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBook {
    records: BTreeMap<LocalId, LocalRecord>,
}

impl RecordBook {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, record: LocalRecord) {
        self.records.insert(record.local_id.clone(), record);
    }

    pub fn get(&self, local_id: &LocalId) -> Option<&LocalRecord> {
        self.records.get(local_id)
    }

    /// Find a record by its remote id.
    pub fn find_remote(&self, id: &str) -> Option<&LocalRecord> {
        self.records
            .values()
            .find(|r| r.state.remote_id().is_some_and(|rid| rid == id))
    }

    /// Flip a pending record to acknowledged. Returns false if unknown.
    pub fn acknowledge(&mut self, local_id: &LocalId, id: RecordId) -> bool {
        match self.records.get_mut(local_id) {
            Some(record) => {
                record.state = RecordState::Acknowledged { id };
                true
            }
            None => false,
        }
    }

    /// Replace the payload of a record, keeping its identity.
    pub fn replace_payload(&mut self, local_id: &LocalId, payload: serde_json::Value) -> bool {
        match self.records.get_mut(local_id) {
            Some(record) => {
                record.payload = payload;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, local_id: &LocalId) -> Option<LocalRecord> {
        self.records.remove(local_id)
    }

    /// Records of one collection in creation order.
    pub fn list(&self, collection: &str) -> Vec<&LocalRecord> {
        self.records
            .values()
            .filter(|r| r.collection == collection)
            .collect()
    }

    /// Count of records still waiting for their create to be acknowledged.
    pub fn pending_count(&self) -> usize {
        self.records.values().filter(|r| r.state.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(n: u64) -> LocalId {
        LocalId::new(n)
    }

    #[test]
    fn acknowledge_replaces_pending_marker() {
        let mut book = RecordBook::new();
        let local_id = id(1);
        book.insert(LocalRecord::pending(local_id.clone(), "events", json!({"name": "X"}), 1));
        assert_eq!(book.pending_count(), 1);

        assert!(book.acknowledge(&local_id, "ev-1".into()));
        let record = book.get(&local_id).unwrap();
        assert_eq!(record.state, RecordState::Acknowledged { id: "ev-1".into() });
        assert_eq!(book.pending_count(), 0);
        assert_eq!(book.find_remote("ev-1").unwrap().local_id, local_id);
    }

    #[test]
    fn acknowledge_unknown_is_noop() {
        let mut book = RecordBook::new();
        assert!(!book.acknowledge(&id(1), "x".into()));
    }

    #[test]
    fn list_is_per_collection_in_creation_order() {
        let mut book = RecordBook::new();
        book.insert(LocalRecord::pending(id(3), "events", json!({"n": 3}), 3));
        book.insert(LocalRecord::pending(id(1), "events", json!({"n": 1}), 1));
        book.insert(LocalRecord::pending(id(2), "participants", json!({"n": 2}), 2));

        let events: Vec<_> = book.list("events").iter().map(|r| r.payload["n"].clone()).collect();
        assert_eq!(events, [json!(1), json!(3)]);
        assert_eq!(book.list("participants").len(), 1);
        assert!(book.list("contributions").is_empty());
    }

    #[test]
    fn record_json_shape() {
        let record = LocalRecord::pending(
            "local_5_abcdefghi".parse().unwrap(),
            "events",
            json!({"name": "X"}),
            5,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"]["status"], "pendingLocal");
        assert_eq!(json["state"]["localId"], "local_5_abcdefghi");
        assert_eq!(json["localId"], "local_5_abcdefghi");
        assert_eq!(json["collection"], "events");
    }
}
