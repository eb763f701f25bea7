//! In-process remote store for demos and tests.

use async_trait::async_trait;
use moi_engine::{RecordId, RemoteCall};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{RemoteError, RemoteStore};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(String, RecordId), serde_json::Value>,
    calls: Vec<RemoteCall>,
    scripted: VecDeque<RemoteError>,
    unavailable: bool,
    latency: Option<Duration>,
    next_id: u64,
}

/// A remote store that keeps records in a map and logs every call.
///
/// Failures can be scripted per call ([`fail_next`](Self::fail_next)) or
/// switched on for every call ([`set_unavailable`](Self::set_unavailable)).
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.lock().latency = Some(latency);
        store
    }

    /// Calls received so far, failed ones included, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Fail the next call with `error`. Scripted failures queue up.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted.push_back(error);
    }

    /// Make every call fail as unavailable until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Stored record, if any.
    pub fn get(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.lock()
            .records
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored records across all collections.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log `call`, wait out the latency and return the scripted failure, if any.
    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let latency = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        if let Some(error) = inner.scripted.pop_front() {
            return Err(error);
        }
        if inner.unavailable {
            return Err(RemoteError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(
        &self,
        collection: &str,
        payload: &serde_json::Value,
    ) -> Result<RecordId, RemoteError> {
        self.begin(RemoteCall::Create {
            collection: collection.to_string(),
            payload: payload.clone(),
        })
        .await?;

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("{}_{}", collection, inner.next_id);
        inner
            .records
            .insert((collection.to_string(), id.clone()), payload.clone());
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            payload: payload.clone(),
        })
        .await?;

        let mut inner = self.lock();
        match inner
            .records
            .get_mut(&(collection.to_string(), id.to_string()))
        {
            Some(record) => {
                *record = payload.clone();
                Ok(())
            }
            None => Err(RemoteError::Rejected(format!("no record {collection}/{id}"))),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.begin(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut inner = self.lock();
        match inner
            .records
            .remove(&(collection.to_string(), id.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(RemoteError::Rejected(format!("no record {collection}/{id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_update_delete() {
        let store = MemoryRemoteStore::new();

        let id = store.create("events", &json!({ "name": "Gala" })).await.unwrap();
        assert_eq!(id, "events_1");

        store
            .update("events", &id, &json!({ "name": "Gala 2026" }))
            .await
            .unwrap();
        assert_eq!(store.get("events", &id).unwrap()["name"], "Gala 2026");

        store.delete("events", &id).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_record_is_rejected() {
        let store = MemoryRemoteStore::new();
        let err = store.update("events", "nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let store = MemoryRemoteStore::new();
        store.fail_next(RemoteError::Unavailable("502".into()));

        let first = store.create("events", &json!({})).await;
        let second = store.create("events", &json!({})).await;

        assert_eq!(first, Err(RemoteError::Unavailable("502".into())));
        assert!(second.is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let store = MemoryRemoteStore::with_latency(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        store.create("events", &json!({})).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
