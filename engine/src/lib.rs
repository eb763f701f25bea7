//! # Moi Engine
//!
//! The deterministic core of Moi's offline sync.
//!
//! This crate decides what happens to writes made while the client may or
//! may not be connected: which ones go straight to the remote store, which
//! ones wait in the queue, when a flush may start, and how its results fold
//! back into the queue, the local records and the observable status.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, disk or a clock
//! - **Deterministic**: every timestamp is passed in by the host
//! - **Single owner**: one [`SyncCore`] per session, checked and mutated in
//!   one call per transition so a lock around it is enough for safety
//!
//! ## Core Concepts
//!
//! ### Local ids
//!
//! Every record created through the engine gets a [`LocalId`]
//! (`local_<millis>_<suffix>`) before the remote store has seen it.
//!
//! ### Pending writes
//!
//! A [`PendingWrite`] is a create, update or delete waiting in the
//! [`PendingWriteQueue`]. The queue is strictly FIFO and never coalesces.
//!
//! ### Flushing
//!
//! [`SyncCore::begin_flush`] drains the queue into a [`FlushBatch`];
//! the host performs the remote calls and [`SyncCore::finish_flush`] settles
//! the results into a [`FlushReport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use moi_engine::{
//!     Dispatch, FlushTrigger, LocalId, PendingWrite, RetryPolicy, SyncCore, WriteOutcome,
//! };
//! use serde_json::json;
//!
//! // Start offline and record a write.
//! let mut core = SyncCore::new(false, RetryPolicy::default());
//! let write = PendingWrite::create(
//!     LocalId::new(1706745600000),
//!     "events",
//!     json!({"name": "Wedding"}),
//!     1706745600000,
//! )
//! .unwrap();
//! core.enqueue(write);
//! assert_eq!(core.status().pending_changes(), 1);
//!
//! // Connectivity returns; flush.
//! assert!(core.set_reachable(true).should_flush);
//! let mut batch = core.begin_flush(FlushTrigger::Reconnect, 1706745601000).unwrap();
//! for i in 0..batch.len() {
//!     if let Dispatch::Send(_call) = batch.dispatch(i) {
//!         batch.record(i, WriteOutcome::Acknowledged { id: "ev-1".into() });
//!     }
//! }
//! let report = core.finish_flush(batch, 1706745601200).unwrap();
//!
//! assert!(report.succeeded());
//! assert_eq!(core.status().pending_changes(), 0);
//! assert_eq!(core.status().last_sync(), Some(1706745601200));
//! ```

pub mod error;
pub mod flush;
pub mod local_id;
pub mod queue;
pub mod record;
pub mod retry;
pub mod status;
pub mod sync;
pub mod write;

// Re-export main types at crate root
pub use error::Error;
pub use flush::{
    Acknowledgement, Dispatch, FlushBatch, FlushReport, FlushTrigger, RejectedWrite, WriteOutcome,
};
pub use local_id::{LocalId, LOCAL_ID_PREFIX};
pub use queue::PendingWriteQueue;
pub use record::{LocalRecord, RecordBook, RecordState};
pub use retry::RetryPolicy;
pub use status::{SyncState, SyncStatus};
pub use sync::{FlushSkip, NetworkChange, Route, SyncCore, ToggleResult};
pub use write::{PendingWrite, RecordRef, RemoteCall, WriteKind};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
