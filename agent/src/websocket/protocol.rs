//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and tagged by a snake_case `type` field.

use moi_engine::{FlushReport, RejectedWrite, SyncStatus};
use serde::{Deserialize, Serialize};

use crate::engine::SyncEvent;

/// Messages sent from client to agent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request a manual sync.
    Sync,

    /// Flip manual offline mode.
    ToggleOffline,

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from agent to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current sync status. Sent on connect and on every change.
    Status { status: SyncStatus },

    /// A queued write was dropped as a permanent failure.
    WriteRejected { write: RejectedWrite },

    /// A flush completed.
    FlushFinished { report: FlushReport },

    /// Response to toggle_offline.
    ManualOffline { enabled: bool },

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<SyncEvent> for ServerMessage {
    fn from(event: SyncEvent) -> Self {
        match event {
            SyncEvent::FlushFinished { report } => ServerMessage::FlushFinished { report },
            SyncEvent::WriteRejected { write } => ServerMessage::WriteRejected { write },
        }
    }
}
