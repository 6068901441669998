//! Timeout supervisor - per-operation cancellable watchdogs
//!
//! Centralizes what would otherwise be ad-hoc timers scattered at call
//! sites: every watchdog is keyed by an operation id, so cancellation on
//! pause/stop is one call and stale firings are detected by id rather than
//! by best-effort timer clearing.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::CrawlEvent;

/// Watchdog registry. Arm exactly when a detail operation starts, disarm
/// exactly when it ends or the session leaves `Processing`.
pub struct TimeoutSupervisor {
    armed: DashMap<String, JoinHandle<()>>,
    events: mpsc::Sender<CrawlEvent>,
}

impl TimeoutSupervisor {
    pub fn new(events: mpsc::Sender<CrawlEvent>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            armed: DashMap::new(),
            events,
        })
    }

    /// Arm a watchdog. If the duration elapses before `disarm`, `on_timeout`
    /// is fed into the event loop. Re-arming an id replaces its watchdog.
    pub fn arm(
        self: &std::sync::Arc<Self>,
        operation_id: &str,
        duration: Duration,
        on_timeout: CrawlEvent,
    ) {
        if let Some((_, old)) = self.armed.remove(operation_id) {
            tracing::debug!("[Supervisor] Re-arming {}", operation_id);
            old.abort();
        }

        let supervisor = self.clone();
        let id = operation_id.to_string();
        // The task must not start its timer until the handle is registered,
        // or a very short duration could elapse before the insert lands and
        // the fire path would find nothing to remove.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;
            tokio::time::sleep(duration).await;
            // Remove-before-send: whichever of fire/disarm removes the entry
            // wins, so a disarmed watchdog can never emit its event.
            if supervisor.armed.remove(&id).is_some() {
                tracing::warn!("[Supervisor] Watchdog fired for {}", id);
                if supervisor.events.send(on_timeout).await.is_err() {
                    tracing::debug!("[Supervisor] Event loop gone, dropping timeout");
                }
            }
        });

        self.armed.insert(operation_id.to_string(), handle);
        let _ = registered_tx.send(());
        tracing::debug!("[Supervisor] Armed {} for {:?}", operation_id, duration);
    }

    /// Disarm one watchdog. Returns false for unknown ids - stale disarms
    /// are expected after rapid pause/resume cycles and are no-ops.
    pub fn disarm(&self, operation_id: &str) -> bool {
        match self.armed.remove(operation_id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::debug!("[Supervisor] Disarmed {}", operation_id);
                true
            }
            None => false,
        }
    }

    /// Disarm everything (pause, stop, completion)
    pub fn disarm_all(&self) {
        let ids: Vec<String> = self.armed.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disarm(&id);
        }
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}
