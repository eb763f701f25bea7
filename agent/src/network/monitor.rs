//! Debounced connectivity signal.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use super::Connectivity;

/// Settled connectivity, published on a `watch` channel.
///
/// The startup snapshot is published as is. Every later edge restarts a
/// debounce timer; the value is only published once edges have stopped for
/// the whole window, and only if it differs from the current one.
#[derive(Debug)]
pub struct NetworkMonitor {
    state: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Start watching `source`.
    pub fn spawn(source: Connectivity, debounce: Duration) -> Self {
        let (tx, state) = watch::channel(source.initial);
        let task = tokio::spawn(run(source.edges, tx, debounce));
        Self { state, task }
    }

    /// Last settled value.
    pub fn current(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that is notified on every settled change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    /// Invoke `callback` with each settled change.
    pub fn on_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let mut state = self.subscribe();
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let online = *state.borrow_and_update();
                callback(online);
            }
        })
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut edges: mpsc::UnboundedReceiver<bool>,
    state: watch::Sender<bool>,
    debounce: Duration,
) {
    let mut pending: Option<bool> = None;
    let timer = sleep(debounce);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            edge = edges.recv() => match edge {
                Some(reachable) => {
                    pending = Some(reachable);
                    timer.as_mut().reset(Instant::now() + debounce);
                }
                None => break,
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(reachable) = pending.take() {
                    settle(&state, reachable);
                }
            }
        }
    }

    // The source is gone; a pending edge still counts once its window ends.
    if let Some(reachable) = pending {
        timer.await;
        settle(&state, reachable);
    }
}

fn settle(state: &watch::Sender<bool>, reachable: bool) {
    let changed = state.send_if_modified(|current| {
        if *current == reachable {
            return false;
        }
        *current = reachable;
        true
    });
    if changed {
        tracing::info!(online = reachable, "Connectivity changed");
    } else {
        tracing::trace!(online = reachable, "Connectivity flap settled without change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualSource;
    use std::sync::{Arc, Mutex};

    const WINDOW: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn test_initial_snapshot() {
        let (_handle, source) = ManualSource::new(false);
        let monitor = NetworkMonitor::spawn(source, WINDOW);
        assert!(!monitor.current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_collapses_into_one_change() {
        let (handle, source) = ManualSource::new(false);
        let monitor = NetworkMonitor::spawn(source, WINDOW);
        let mut rx = monitor.subscribe();

        for reachable in [true, false, true, false, true] {
            handle.set(reachable);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!monitor.current());

        tokio::time::sleep(WINDOW).await;
        assert!(monitor.current());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // Nothing else is pending.
        tokio::time::sleep(WINDOW * 4).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_back_to_same_value_is_silent() {
        let (handle, source) = ManualSource::new(true);
        let monitor = NetworkMonitor::spawn(source, WINDOW);
        let rx = monitor.subscribe();

        handle.set(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.set(true);
        tokio::time::sleep(WINDOW * 2).await;

        assert!(monitor.current());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_change_callback() {
        let (handle, source) = ManualSource::new(true);
        let monitor = NetworkMonitor::spawn(source, WINDOW);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _task = monitor.on_change(move |online| sink.lock().unwrap().push(online));

        handle.set(false);
        tokio::time::sleep(WINDOW * 2).await;
        handle.set(true);
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }
}
