//! Connectivity sources feeding the monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::Connectivity;

/// Source driven by hand through a [`ConnectivityHandle`].
pub struct ManualSource;

impl ManualSource {
    /// Create a source starting at `initial` and the handle that drives it.
    pub fn new(initial: bool) -> (ConnectivityHandle, Connectivity) {
        let (tx, edges) = mpsc::unbounded_channel();
        let handle = ConnectivityHandle {
            tx,
            current: Arc::new(AtomicBool::new(initial)),
        };
        (handle, Connectivity { initial, edges })
    }
}

/// Emits raw edges into a [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: mpsc::UnboundedSender<bool>,
    current: Arc<AtomicBool>,
}

impl ConnectivityHandle {
    /// Report the remote as reachable or not. Every call is an edge, even
    /// a repeat of the current value.
    pub fn set(&self, reachable: bool) {
        self.current.store(reachable, Ordering::SeqCst);
        if self.tx.send(reachable).is_err() {
            tracing::debug!("Connectivity edge dropped, monitor is gone");
        }
    }

    /// Last raw value reported.
    pub fn current(&self) -> bool {
        self.current.load(Ordering::SeqCst)
    }
}

/// Polls a health endpoint and reports edges when the answer changes.
#[derive(Debug, Clone)]
pub struct ProbeSource {
    client: Client,
    url: String,
    interval: Duration,
}

impl ProbeSource {
    pub fn new(client: Client, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            interval,
        }
    }

    /// Probe once for the startup snapshot, then keep polling in the background.
    pub async fn start(self) -> Connectivity {
        let initial = self.probe().await;
        let (tx, edges) = mpsc::unbounded_channel();
        tracing::info!(url = %self.url, online = initial, "Connectivity probe started");

        tokio::spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let reachable = self.probe().await;
                if reachable == last {
                    continue;
                }
                last = reachable;
                if tx.send(reachable).is_err() {
                    break;
                }
            }
        });

        Connectivity { initial, edges }
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.url, "Probe failed: {}", e);
                false
            }
        }
    }
}
