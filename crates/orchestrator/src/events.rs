//! Events driving the orchestration loop, plus the observer bus
//!
//! Every signal entering the state machine is a variant of one closed enum,
//! so dispatch is exhaustive at compile time - no string switches. Observer
//! notifications travel on a separate broadcast bus consumed by whatever UI
//! surrounds the core.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::mailbox::PageMarker;
use crate::state::{ResultItem, SessionSettings, TaskId};

/// Input to `AutomationStateManager::handle_event`
///
/// User commands, adapter callbacks, watchdog firings and cross-context
/// markers all arrive through this one type, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrawlEvent {
    UserStart {
        task_id: TaskId,
        keywords: Vec<String>,
        settings: SessionSettings,
    },
    UserPause,
    UserResume,
    UserStop,
    /// A fresh listing snapshot was captured
    SerpReady { results: Vec<ResultItem> },
    /// A detail operation began; sets the in-flight cursor
    LinkOpened { url: String },
    /// A detail context reported back
    LandingProcessed { target_url: String, extracted_count: u64 },
    /// The watchdog gave up on a detail context
    LandingTimeout { target_url: String },
    /// Adapter ground truth: pagination is physically exhausted
    PageEnd,
    CaptchaDetected,
    MarkerArrived(PageMarker),
}

/// Observer notifications - read-only progress surface for a UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionNotice {
    Started { task_id: TaskId },
    Paused,
    Resumed,
    Stopped,
    SerpCaptured { keyword: String, page: u32, count: usize },
    LinkOpened { url: String },
    LandingDone { url: String, extracted: u64, timed_out: bool },
    Progress { processed: u64, extracted: u64 },
    Completed { processed: u64, extracted: u64 },
}

/// Broadcast bus for session notices
pub struct EventBus {
    tx: broadcast::Sender<SessionNotice>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish a notice; no subscribers is not an error
    pub fn publish(&self, notice: SessionNotice) {
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
