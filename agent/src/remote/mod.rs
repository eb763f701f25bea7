//! The remote persistent store the queue drains into.
//!
//! The engine only relies on per-call atomicity: each create, update or
//! delete either lands or fails as a unit. Failures come in two kinds,
//! transient ([`RemoteError::Unavailable`]) and permanent
//! ([`RemoteError::Rejected`]), and the retry policy treats them differently.

mod http;
mod memory;

pub use http::{HttpRemoteStore, HttpStoreError};
pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use moi_engine::{RecordId, RemoteCall, WriteOutcome};

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network failure, timeout or server-side trouble. Worth retrying.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (validation, missing record). Never retried.
    #[error("remote store rejected the write: {0}")]
    Rejected(String),
}

/// Document store reached by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record and return its permanent id.
    async fn create(
        &self,
        collection: &str,
        payload: &serde_json::Value,
    ) -> Result<RecordId, RemoteError>;

    /// Replace the record `id` with `payload`.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError>;

    /// Delete the record `id`.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;
}

/// Perform `call` and return the id of the affected record.
pub async fn execute(store: &dyn RemoteStore, call: &RemoteCall) -> Result<RecordId, RemoteError> {
    match call {
        RemoteCall::Create {
            collection,
            payload,
        } => store.create(collection, payload).await,
        RemoteCall::Update {
            collection,
            id,
            payload,
        } => {
            store.update(collection, id, payload).await?;
            Ok(id.clone())
        }
        RemoteCall::Delete { collection, id } => {
            store.delete(collection, id).await?;
            Ok(id.clone())
        }
    }
}

/// Map the result of a remote call onto the engine's outcome type.
pub fn outcome(result: Result<RecordId, RemoteError>) -> WriteOutcome {
    match result {
        Ok(id) => WriteOutcome::Acknowledged { id },
        Err(RemoteError::Unavailable(reason)) => WriteOutcome::Unavailable { reason },
        Err(RemoteError::Rejected(reason)) => WriteOutcome::Rejected { reason },
    }
}
