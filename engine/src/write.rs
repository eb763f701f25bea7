//! Pending writes: mutations waiting for remote acknowledgement.
//!
//! A write is immutable once queued except for its retry counter.

use crate::{error::Result, CollectionName, Error, LocalId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Payload key stamped into created records.
pub const LOCAL_ID_FIELD: &str = "localId";

/// Reference to the record a write targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RecordRef {
    /// A record the remote store already knows.
    Remote(RecordId),
    /// A record created on this client, possibly not yet acknowledged.
    Local(LocalId),
}

impl RecordRef {
    /// Interpret a raw id: anything that parses as a [`LocalId`] is local.
    pub fn parse(raw: &str) -> Self {
        if LocalId::is_local(raw) {
            if let Ok(local_id) = raw.parse() {
                return RecordRef::Local(local_id);
            }
        }
        RecordRef::Remote(raw.to_string())
    }
}

/// What a pending write does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WriteKind {
    Create,
    Update { target: RecordRef },
    Delete { target: RecordRef },
}

impl WriteKind {
    /// The targeted record, if the write is not a create.
    pub fn target(&self) -> Option<&RecordRef> {
        match self {
            WriteKind::Create => None,
            WriteKind::Update { target } | WriteKind::Delete { target } => Some(target),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, WriteKind::Create)
    }
}

/// A mutation queued for the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    local_id: LocalId,
    collection: CollectionName,
    kind: WriteKind,
    payload: serde_json::Value,
    created_at: Timestamp,
    retry_count: u32,
}

impl PendingWrite {
    /// A create. The payload must be a JSON object; `localId` is stamped into it.
    pub fn create(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        created_at: Timestamp,
    ) -> Result<Self> {
        let collection = validate_collection(collection.into())?;
        let mut payload = require_object(payload)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert(
                LOCAL_ID_FIELD.to_string(),
                serde_json::Value::String(local_id.to_string()),
            );
        }

        Ok(Self {
            local_id,
            collection,
            kind: WriteKind::Create,
            payload,
            created_at,
            retry_count: 0,
        })
    }

    /// A full-replacement update of `target`.
    pub fn update(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        target: RecordRef,
        payload: serde_json::Value,
        created_at: Timestamp,
    ) -> Result<Self> {
        Ok(Self {
            local_id,
            collection: validate_collection(collection.into())?,
            kind: WriteKind::Update { target },
            payload: require_object(payload)?,
            created_at,
            retry_count: 0,
        })
    }

    /// A delete of `target`.
    pub fn delete(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        target: RecordRef,
        created_at: Timestamp,
    ) -> Result<Self> {
        Ok(Self {
            local_id,
            collection: validate_collection(collection.into())?,
            kind: WriteKind::Delete { target },
            payload: serde_json::Value::Null,
            created_at,
            retry_count: 0,
        })
    }

    /// Identifier of this write. For creates it is also the record's local id.
    pub fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    pub fn kind(&self) -> &WriteKind {
        &self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn record_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}

/// A remote call derived from a pending write with all local targets resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RemoteCall {
    Create {
        collection: CollectionName,
        payload: serde_json::Value,
    },
    Update {
        collection: CollectionName,
        id: RecordId,
        payload: serde_json::Value,
    },
    Delete {
        collection: CollectionName,
        id: RecordId,
    },
}

impl RemoteCall {
    pub fn collection(&self) -> &CollectionName {
        match self {
            RemoteCall::Create { collection, .. }
            | RemoteCall::Update { collection, .. }
            | RemoteCall::Delete { collection, .. } => collection,
        }
    }

    /// Build the call for `write`, with `target_id` the resolved remote id
    /// for updates and deletes.
    pub(crate) fn for_write(write: &PendingWrite, target_id: Option<RecordId>) -> Option<Self> {
        let collection = write.collection.clone();
        match (&write.kind, target_id) {
            (WriteKind::Create, _) => Some(RemoteCall::Create {
                collection,
                payload: write.payload.clone(),
            }),
            (WriteKind::Update { .. }, Some(id)) => Some(RemoteCall::Update {
                collection,
                id,
                payload: write.payload.clone(),
            }),
            (WriteKind::Delete { .. }, Some(id)) => Some(RemoteCall::Delete { collection, id }),
            _ => None,
        }
    }
}

fn validate_collection(name: CollectionName) -> Result<CollectionName> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(name)
    } else {
        Err(Error::InvalidCollection(name))
    }
}

fn require_object(payload: serde_json::Value) -> Result<serde_json::Value> {
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(Error::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local(n: u64) -> LocalId {
        LocalId::new(n)
    }

    #[test]
    fn create_stamps_local_id() {
        let id = local(1000);
        let write = PendingWrite::create(id.clone(), "events", json!({"name": "X"}), 1000).unwrap();

        assert_eq!(write.payload()["name"], "X");
        assert_eq!(write.payload()[LOCAL_ID_FIELD], id.to_string());
        assert_eq!(write.retry_count(), 0);
        assert!(write.kind().is_create());
    }

    #[test]
    fn create_requires_object_payload() {
        let result = PendingWrite::create(local(1), "events", json!([1, 2]), 1);
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn collection_names_are_validated() {
        for bad in ["", "a b", "events/1", "../x"] {
            let result = PendingWrite::create(local(1), bad, json!({}), 1);
            assert!(matches!(result, Err(Error::InvalidCollection(_))), "{bad}");
        }
        assert!(PendingWrite::create(local(1), "sms_templates", json!({}), 1).is_ok());
    }

    #[test]
    fn record_failure_only_touches_retry_count() {
        let mut write = PendingWrite::create(local(5), "participants", json!({"name": "Raj"}), 5).unwrap();
        let before = write.clone();

        write.record_failure();
        write.record_failure();

        assert_eq!(write.retry_count(), 2);
        assert_eq!(write.payload(), before.payload());
        assert_eq!(write.created_at(), before.created_at());
        assert_eq!(write.local_id(), before.local_id());
    }

    #[test]
    fn record_ref_parse() {
        let id = local(77);
        assert_eq!(RecordRef::parse(&id.to_string()), RecordRef::Local(id));
        assert_eq!(RecordRef::parse("abc123"), RecordRef::Remote("abc123".into()));
        // Prefixed but malformed ids are treated as remote ids.
        assert_eq!(RecordRef::parse("local_x"), RecordRef::Remote("local_x".into()));
    }

    #[test]
    fn remote_call_requires_target_for_update() {
        let write = PendingWrite::update(
            local(9),
            "events",
            RecordRef::Remote("e1".into()),
            json!({"name": "Y"}),
            9,
        )
        .unwrap();

        assert!(RemoteCall::for_write(&write, None).is_none());
        let call = RemoteCall::for_write(&write, Some("e1".into())).unwrap();
        assert_eq!(call.collection(), "events");
        assert!(matches!(call, RemoteCall::Update { ref id, .. } if id == "e1"));
    }

    #[test]
    fn pending_write_json_shape() {
        let write = PendingWrite::delete(
            "local_3_abcdefghi".parse().unwrap(),
            "contributions",
            RecordRef::Remote("c9".into()),
            3,
        )
        .unwrap();
        let json = serde_json::to_value(&write).unwrap();

        assert_eq!(json["localId"], "local_3_abcdefghi");
        assert_eq!(json["kind"]["type"], "delete");
        assert_eq!(json["kind"]["target"]["kind"], "remote");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["createdAt"], 3);
    }
}
