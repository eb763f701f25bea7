//! Observable sync status.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Whether a flush is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
}

/// Read-only snapshot of the sync subsystem.
///
/// Only [`SyncCore`](crate::SyncCore) builds these, so `pending_changes`
/// always mirrors the queue and `syncing` implies `online`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    online: bool,
    last_sync: Option<Timestamp>,
    pending_changes: usize,
    syncing: bool,
    manual_offline: bool,
}

impl SyncStatus {
    pub(crate) fn new(
        online: bool,
        last_sync: Option<Timestamp>,
        pending_changes: usize,
        state: SyncState,
        manual_offline: bool,
    ) -> Self {
        let syncing = state == SyncState::Syncing;
        Self {
            online: online || syncing,
            last_sync,
            pending_changes,
            syncing,
            manual_offline,
        }
    }

    /// Best-known connectivity, including the manual offline override.
    pub fn online(&self) -> bool {
        self.online
    }

    /// Completion time of the last fully successful flush.
    pub fn last_sync(&self) -> Option<Timestamp> {
        self.last_sync
    }

    /// Writes not yet acknowledged, including any in the running flush.
    pub fn pending_changes(&self) -> usize {
        self.pending_changes
    }

    pub fn syncing(&self) -> bool {
        self.syncing
    }

    /// Whether the user forced offline mode.
    pub fn manual_offline(&self) -> bool {
        self.manual_offline
    }
}

impl Default for SyncStatus {
    /// Cold start: online, nothing pending, never synced.
    fn default() -> Self {
        Self::new(true, None, 0, SyncState::Idle, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syncing_implies_online() {
        let status = SyncStatus::new(false, None, 3, SyncState::Syncing, false);
        assert!(status.syncing());
        assert!(status.online());
    }

    #[test]
    fn cold_start_defaults_online() {
        let status = SyncStatus::default();
        assert!(status.online());
        assert!(!status.syncing());
        assert_eq!(status.pending_changes(), 0);
        assert_eq!(status.last_sync(), None);
    }

    #[test]
    fn camel_case_wire_format() {
        let status = SyncStatus::new(true, Some(1000), 2, SyncState::Idle, false);
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(
            json,
            r#"{"online":true,"lastSync":1000,"pendingChanges":2,"syncing":false,"manualOffline":false}"#
        );
    }
}
