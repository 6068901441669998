//! Automation state - the single persisted record driving a crawl session
//!
//! Everything the orchestrator knows lives here. An execution context can be
//! torn down at any navigation, so this record must be enough to reconstruct
//! the exact next step from cold storage.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier correlating every execution context of one run
pub type TaskId = String;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Session lifecycle status
///
/// `Idle` and `Completed` are terminal for autonomous progress - both need
/// an explicit user event to resume activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Processing,
    Paused,
    Completed,
}

/// One entry captured from a listing snapshot
///
/// Carries only data, never a live page handle. Enough to re-request the
/// element from the page adapter via `external_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub url: String,
    pub title: String,
    /// Adapter-side handle (e.g. a DOM anchor id) used for visual feedback
    pub external_ref: String,
}

/// Session configuration, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Bound on waiting for a listing snapshot after search/pagination
    pub serp_link_timeout_ms: u64,
    /// Bound on a detail-page operation before it is counted as failed
    pub landing_page_timeout_ms: u64,
    pub max_pages_per_keyword: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            serp_link_timeout_ms: 30_000,
            landing_page_timeout_ms: 25_000,
            max_pages_per_keyword: 5,
        }
    }
}

/// The automation record - one per active session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationState {
    pub task_id: TaskId,
    /// Ordered search terms, immutable for the session's lifetime
    pub keywords: Vec<String>,
    pub current_keyword_index: usize,
    /// 1-based, bounded by `settings.max_pages_per_keyword`
    pub current_page: u32,
    pub current_result_index: usize,
    /// Snapshot of the most recent listing page
    pub current_results: Vec<ResultItem>,
    /// Cached `current_results.len()` for cheap comparisons
    pub total_results_count: usize,
    pub status: SessionStatus,
    pub processed_links_count: u64,
    pub extracted_info_count: u64,
    /// The one in-flight detail operation, or None
    pub current_operating_url: Option<String>,
    pub current_operation_start_time: Option<u64>,
    pub settings: SessionSettings,
    pub created_at: u64,
    pub last_update_time: u64,
}

impl AutomationState {
    pub fn new(task_id: TaskId, keywords: Vec<String>, settings: SessionSettings) -> Self {
        let now = now_ms();
        Self {
            task_id,
            keywords,
            current_keyword_index: 0,
            current_page: 1,
            current_result_index: 0,
            current_results: Vec::new(),
            total_results_count: 0,
            status: SessionStatus::Idle,
            processed_links_count: 0,
            extracted_info_count: 0,
            current_operating_url: None,
            current_operation_start_time: None,
            settings,
            created_at: now,
            last_update_time: now,
        }
    }

    pub fn current_keyword(&self) -> Option<&str> {
        self.keywords
            .get(self.current_keyword_index)
            .map(String::as_str)
    }

    pub fn current_result(&self) -> Option<&ResultItem> {
        self.current_results.get(self.current_result_index)
    }

    /// Record a fresh listing snapshot, resetting the result cursor
    pub fn record_snapshot(&mut self, results: Vec<ResultItem>) {
        self.total_results_count = results.len();
        self.current_results = results;
        self.current_result_index = 0;
        self.touch();
    }

    /// Drop the listing snapshot (a new one must be captured per page)
    pub fn clear_snapshot(&mut self) {
        self.current_results.clear();
        self.total_results_count = 0;
        self.current_result_index = 0;
    }

    pub fn clear_operation(&mut self) {
        self.current_operating_url = None;
        self.current_operation_start_time = None;
    }

    /// Soft reset: cursors and counters back to initial values, keywords and
    /// settings retained so a stopped session can restart without re-fetching
    /// configuration.
    pub fn soft_reset(&mut self) {
        self.current_keyword_index = 0;
        self.current_page = 1;
        self.clear_snapshot();
        self.processed_links_count = 0;
        self.extracted_info_count = 0;
        self.clear_operation();
        self.status = SessionStatus::Idle;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_update_time = now_ms();
    }

    /// Check the record's structural invariants (debugging aid)
    pub fn invariants_hold(&self) -> bool {
        let index_bound = self.current_result_index <= self.total_results_count;
        let page_bound = self.current_page >= 1
            && self.current_page <= self.settings.max_pages_per_keyword;
        let keyword_bound = self.status == SessionStatus::Completed
            || self.current_keyword_index < self.keywords.len().max(1);
        index_bound && page_bound && keyword_bound
    }
}
