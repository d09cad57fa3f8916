/// Lifecycle Watcher - turns the engine's event feed into per-sandbox
/// "it has ended" notifications.
///
/// **Ownership:**
/// One instance per process, constructed at startup and shared by `Arc`
/// with every job. Tests construct their own.
///
/// **Delivery rules:**
/// - Only die, kill and stop events are considered
/// - All listeners of a sandbox are removed together on its first ended event,
///   so a duplicate event is a no-op
/// - Sends never block: a listener whose channel is full or closed is skipped,
///   and relies on its deadline instead

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{EngineClient, LifecycleEvent};

/// Pause before re-subscribing after the event feed ends or fails
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct Watcher {
    containers: Mutex<HashMap<String, Vec<mpsc::Sender<()>>>>,
    started: AtomicBool,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the next ended event for `container_id` on `stopped`.
    ///
    /// `stopped` should have room for one message; it is never awaited.
    pub fn watch_stop(&self, container_id: &str, stopped: mpsc::Sender<()>) {
        self.lock()
            .entry(container_id.to_string())
            .or_default()
            .push(stopped);
    }

    /// Drop every listener of a sandbox without notifying it.
    pub fn forget(&self, container_id: &str) {
        self.lock().remove(container_id);
    }

    /// Number of listeners waiting on a sandbox
    #[cfg(test)]
    pub fn watching(&self, container_id: &str) -> usize {
        self.lock().get(container_id).map_or(0, Vec::len)
    }

    /// Handle one event from the feed; returns how many listeners got it.
    pub fn dispatch(&self, event: &LifecycleEvent) -> usize {
        if !event.is_ended() {
            return 0;
        }

        let listeners = match self.lock().remove(&event.container_id) {
            Some(listeners) => listeners,
            None => return 0,
        };

        let mut delivered = 0;
        for stopped in listeners {
            match stopped.try_send(()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        container_id = %event.container_id,
                        "Listener not ready, dropping stop notification"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        container_id = %event.container_id,
                        "Listener gone, dropping stop notification"
                    );
                }
            }
        }

        debug!(
            container_id = %event.container_id,
            status = %event.status,
            delivered,
            "Dispatched lifecycle event"
        );
        delivered
    }

    /// Start consuming the engine's event feed in a background task.
    ///
    /// Returns `None` if this watcher was already started.
    pub fn start(self: &Arc<Self>, engine: Arc<dyn EngineClient>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Lifecycle watcher already started");
            return None;
        }

        let watcher = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                info!("Subscribing to engine lifecycle events");
                let mut events = engine.events();

                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            watcher.dispatch(&event);
                        }
                        Err(e) => {
                            warn!(error = %e, "Lifecycle event feed failed");
                            break;
                        }
                    }
                }

                warn!(
                    retry_ms = RESUBSCRIBE_DELAY.as_millis() as u64,
                    "Lifecycle event feed closed, resubscribing"
                );
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        }))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<mpsc::Sender<()>>>> {
        // The map stays consistent even if a holder panicked.
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop_event(id: &str) -> LifecycleEvent {
        LifecycleEvent::new(id, "stop")
    }

    #[test]
    fn test_new_watcher_is_empty() {
        let watcher = Watcher::new();
        assert_eq!(watcher.watching("1234"), 0);
    }

    #[test]
    fn test_watch_stopped() {
        let watcher = Watcher::new();
        let (tx, mut rx) = mpsc::channel(1);

        watcher.watch_stop("1234", tx);
        assert_eq!(watcher.watching("1234"), 1);

        assert_eq!(watcher.dispatch(&stop_event("1234")), 1);
        assert!(rx.try_recv().is_ok());
        assert_eq!(watcher.watching("1234"), 0);
    }

    #[test]
    fn test_ignores_running_events() {
        let watcher = Watcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        watcher.watch_stop("1234", tx);

        assert_eq!(watcher.dispatch(&LifecycleEvent::new("1234", "start")), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(watcher.watching("1234"), 1);
    }

    #[test]
    fn test_ignores_other_containers() {
        let watcher = Watcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        watcher.watch_stop("1234", tx);

        assert_eq!(watcher.dispatch(&LifecycleEvent::new("5678", "die")), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_event_is_noop() {
        let watcher = Watcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        watcher.watch_stop("1234", tx);

        assert_eq!(watcher.dispatch(&LifecycleEvent::new("1234", "die")), 1);
        assert_eq!(watcher.dispatch(&LifecycleEvent::new("1234", "stop")), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fans_out_to_every_listener() {
        let watcher = Watcher::new();
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(1);
        watcher.watch_stop("1234", tx1);
        watcher.watch_stop("1234", tx2);

        assert_eq!(watcher.dispatch(&LifecycleEvent::new("1234", "kill")), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_full_listener_does_not_block_others() {
        let watcher = Watcher::new();
        let (busy_tx, _busy_rx) = mpsc::channel(1);
        busy_tx.try_send(()).unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        watcher.watch_stop("1234", busy_tx);
        watcher.watch_stop("1234", tx);

        assert_eq!(watcher.dispatch(&stop_event("1234")), 1);
        assert!(rx.try_recv().is_ok());
        assert_eq!(watcher.watching("1234"), 0);
    }

    #[test]
    fn test_closed_listener_is_skipped() {
        let watcher = Watcher::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        watcher.watch_stop("1234", tx);

        assert_eq!(watcher.dispatch(&stop_event("1234")), 0);
        assert_eq!(watcher.watching("1234"), 0);
    }

    #[test]
    fn test_forget() {
        let watcher = Watcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        watcher.watch_stop("1234", tx);

        watcher.forget("1234");
        assert_eq!(watcher.dispatch(&stop_event("1234")), 0);
        assert!(rx.try_recv().is_err());
    }
}
