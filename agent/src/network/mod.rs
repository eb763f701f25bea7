//! Connectivity detection.
//!
//! A connectivity source reports raw reachable/unreachable edges plus a
//! startup snapshot. [`NetworkMonitor`] collapses flapping edges into settled
//! values and publishes them on a `watch` channel.

mod monitor;
mod source;

pub use monitor::NetworkMonitor;
pub use source::{ConnectivityHandle, ManualSource, ProbeSource};

use tokio::sync::mpsc;

/// Raw signal from a connectivity source.
#[derive(Debug)]
pub struct Connectivity {
    /// Reachability at startup.
    pub initial: bool,
    /// Edge events; `true` means the remote became reachable.
    pub edges: mpsc::UnboundedReceiver<bool>,
}

impl Connectivity {
    /// A signal with no source behind it: online, and it never changes.
    pub fn always_online() -> Self {
        let (_tx, edges) = mpsc::unbounded_channel();
        Self {
            initial: true,
            edges,
        }
    }
}
