//! Automation state manager - owns the record, applies events, persists
//!
//! All mutation goes through `handle_event`; nothing writes fields directly.
//! Every mutation is committed to the store before the resulting action is
//! returned, so the current context can die at any point afterwards and a
//! successor reconstructs the exact same next step.

use crate::decision::{decide, Action};
use crate::events::CrawlEvent;
use crate::mailbox::{MarkerAction, PageMarker};
use crate::state::{
    now_ms, AutomationState, ResultItem, SessionSettings, SessionStatus, TaskId,
};
use crate::store::StateStore;

pub struct AutomationStateManager {
    store: StateStore,
    state: Option<AutomationState>,
    loaded: bool,
}

impl AutomationStateManager {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            state: None,
            loaded: false,
        }
    }

    pub fn state(&self) -> Option<&AutomationState> {
        self.state.as_ref()
    }

    /// Lazily load the record on the first call in a new context
    pub async fn ensure_loaded(&mut self) {
        if !self.loaded {
            self.state = self.store.load().await;
            self.loaded = true;
            if let Some(state) = &self.state {
                tracing::info!(
                    "[Manager] Recovered session {} ({:?}, keyword {}/{}, page {}, result {}/{})",
                    state.task_id,
                    state.status,
                    state.current_keyword_index + 1,
                    state.keywords.len(),
                    state.current_page,
                    state.current_result_index,
                    state.total_results_count,
                );
            }
        }
    }

    /// Cold-start obligation: load, and if non-terminal, decide and act
    pub async fn resume_from_cold(&mut self) -> Option<Action> {
        self.ensure_loaded().await;
        let action = match &self.state {
            Some(state) if state.status == SessionStatus::Processing => Some(self.advance()),
            _ => None,
        };
        if action.is_some() {
            // advance() may have moved cursors; the successor of THIS
            // context must see them too.
            self.commit().await;
        }
        action
    }

    /// Apply one event: mutate, commit, return the next action (if any)
    pub async fn handle_event(&mut self, event: CrawlEvent) -> Option<Action> {
        self.ensure_loaded().await;

        let action = match event {
            CrawlEvent::UserStart {
                task_id,
                keywords,
                settings,
            } => self.user_start(task_id, keywords, settings),
            CrawlEvent::UserPause => self.user_pause(),
            CrawlEvent::UserResume => self.user_resume(),
            CrawlEvent::UserStop => self.user_stop(),
            CrawlEvent::SerpReady { results } => self.serp_ready(results),
            CrawlEvent::LinkOpened { url } => self.link_opened(url),
            CrawlEvent::LandingProcessed {
                target_url,
                extracted_count,
            } => self.complete_operation(&target_url, extracted_count, false),
            CrawlEvent::LandingTimeout { target_url } => {
                self.complete_operation(&target_url, 0, true)
            }
            CrawlEvent::PageEnd => self.page_end(),
            CrawlEvent::CaptchaDetected => self.captcha_detected(),
            CrawlEvent::MarkerArrived(marker) => self.marker_arrived(marker),
        };

        self.commit().await;
        action
    }

    /// Persist the record, honoring the lifecycle: Idle (stopped) and
    /// Completed sessions are discarded from the store.
    async fn commit(&self) {
        match &self.state {
            Some(state)
                if matches!(
                    state.status,
                    SessionStatus::Idle | SessionStatus::Completed
                ) =>
            {
                self.store.clear().await;
            }
            Some(state) => self.store.save(state).await,
            None => {}
        }
    }

    fn user_start(
        &mut self,
        task_id: TaskId,
        keywords: Vec<String>,
        settings: SessionSettings,
    ) -> Option<Action> {
        if keywords.is_empty() {
            tracing::warn!("[Manager] Start rejected: empty keyword list");
            return Some(Action::Cleanup);
        }

        tracing::info!(
            "[Manager] Starting session {} with {} keyword(s)",
            task_id,
            keywords.len()
        );
        let mut state = AutomationState::new(task_id, keywords, settings);
        state.status = SessionStatus::Processing;
        self.state = Some(state);
        Some(self.advance())
    }

    fn user_pause(&mut self) -> Option<Action> {
        match &mut self.state {
            Some(state) if state.status == SessionStatus::Processing => {
                state.status = SessionStatus::Paused;
                state.touch();
                tracing::info!("[Manager] Paused");
                // The executor cancels the outstanding watchdog on this action.
                Some(Action::WaitForUnblock)
            }
            _ => {
                tracing::warn!("[Manager] Pause ignored outside Processing");
                Some(Action::Cleanup)
            }
        }
    }

    fn user_resume(&mut self) -> Option<Action> {
        match &mut self.state {
            Some(state) if state.status == SessionStatus::Paused => {
                state.status = SessionStatus::Processing;
                if let Some(url) = state.current_operating_url.take() {
                    // The pause invalidated this operation; its marker (if it
                    // ever comes) was already rejected. Re-open the same item.
                    tracing::info!("[Manager] Abandoning in-flight operation {}", url);
                    state.current_operation_start_time = None;
                }
                state.touch();
                tracing::info!("[Manager] Resumed");
                Some(self.advance())
            }
            _ => {
                tracing::warn!("[Manager] Resume ignored outside Paused");
                Some(Action::Cleanup)
            }
        }
    }

    fn user_stop(&mut self) -> Option<Action> {
        if let Some(state) = &mut self.state {
            state.soft_reset();
            tracing::info!("[Manager] Stopped (soft reset, keywords retained)");
        }
        Some(Action::Cleanup)
    }

    fn serp_ready(&mut self, results: Vec<ResultItem>) -> Option<Action> {
        match &mut self.state {
            Some(state)
                if state.status == SessionStatus::Processing
                    && state.current_operating_url.is_none() =>
            {
                tracing::info!(
                    "[Manager] Listing snapshot: {} result(s) for {:?} page {}",
                    results.len(),
                    state.current_keyword(),
                    state.current_page
                );
                state.record_snapshot(results);
                Some(self.advance())
            }
            Some(state) if state.status == SessionStatus::Processing => {
                // A stale snapshot must never corrupt cursors, and dropping
                // it must leave the outstanding operation's watchdog alone.
                tracing::warn!("[Manager] SerpReady ignored while an operation is outstanding");
                None
            }
            _ => {
                tracing::warn!("[Manager] SerpReady ignored outside Processing");
                Some(Action::Cleanup)
            }
        }
    }

    fn link_opened(&mut self, url: String) -> Option<Action> {
        match &mut self.state {
            Some(state)
                if state.status == SessionStatus::Processing
                    && state.current_operating_url.is_none() =>
            {
                tracing::info!("[Manager] Operating on {}", url);
                state.current_operating_url = Some(url);
                state.current_operation_start_time = Some(now_ms());
                state.touch();
                None
            }
            Some(state) if state.status == SessionStatus::Processing => {
                // Rejecting must not touch watchdogs: the outstanding
                // operation is still live.
                tracing::warn!("[Manager] LinkOpened ignored: operation already outstanding");
                None
            }
            _ => {
                tracing::warn!("[Manager] LinkOpened ignored outside Processing");
                Some(Action::Cleanup)
            }
        }
    }

    /// Convergence point for success and timeout: both advance the cursor,
    /// count the link as processed, and clear the in-flight operation.
    fn complete_operation(
        &mut self,
        target_url: &str,
        extracted: u64,
        timed_out: bool,
    ) -> Option<Action> {
        let state = match &mut self.state {
            Some(state) if state.status == SessionStatus::Processing => state,
            _ => {
                tracing::warn!("[Manager] Landing event ignored outside Processing");
                return Some(Action::Cleanup);
            }
        };

        if state.current_operating_url.as_deref() != Some(target_url) {
            // Debris from an abandoned operation. Dropping it silently keeps
            // the current operation's watchdog intact.
            tracing::warn!(
                "[Manager] Landing event for non-current url {} (current: {:?})",
                target_url,
                state.current_operating_url
            );
            return None;
        }

        state.processed_links_count += 1;
        state.current_result_index += 1;
        state.extracted_info_count += extracted;
        state.clear_operation();
        state.touch();

        if timed_out {
            tracing::warn!(
                "[Manager] {} timed out ({} processed so far)",
                target_url,
                state.processed_links_count
            );
        } else {
            tracing::info!(
                "[Manager] {} done, {} record(s) extracted",
                target_url,
                extracted
            );
        }

        Some(self.advance())
    }

    fn page_end(&mut self) -> Option<Action> {
        match &self.state {
            Some(state) if state.status == SessionStatus::Processing => {
                // Adapter ground truth overrides the decision table's
                // pagination optimism: force the keyword switch.
                tracing::info!("[Manager] Pagination exhausted, switching keyword");
                Some(self.move_to_next_keyword())
            }
            _ => Some(Action::Cleanup),
        }
    }

    fn captcha_detected(&mut self) -> Option<Action> {
        match &mut self.state {
            Some(state) if state.status == SessionStatus::Processing => {
                state.status = SessionStatus::Paused;
                state.touch();
                tracing::warn!("[Manager] CAPTCHA detected, pausing until user resume");
                Some(Action::WaitForUnblock)
            }
            _ => Some(Action::Cleanup),
        }
    }

    fn marker_arrived(&mut self, marker: PageMarker) -> Option<Action> {
        let state = match &self.state {
            Some(state) => state,
            None => {
                tracing::warn!("[Manager] Marker with no active session");
                return Some(Action::Cleanup);
            }
        };

        if marker.task_id != state.task_id {
            tracing::warn!(
                "[Manager] Marker for stale task {} (current: {})",
                marker.task_id,
                state.task_id
            );
            return None;
        }
        if state.status != SessionStatus::Processing {
            tracing::warn!("[Manager] Marker ignored while {:?}", state.status);
            return Some(Action::Cleanup);
        }

        match (&marker.action, &marker.result_url) {
            (MarkerAction::Next, Some(url))
                if state.current_operating_url.as_deref() == Some(url.as_str()) =>
            {
                let url = url.clone();
                let extracted = marker.extracted_count();
                self.complete_operation(&url, extracted, false)
            }
            _ => {
                tracing::warn!("[Manager] Unroutable marker: {:?}", marker.action);
                None
            }
        }
    }

    /// Run the decision engine and translate cursor-moving decisions into
    /// cursor mutations before handing the action back.
    fn advance(&mut self) -> Action {
        let state = match &mut self.state {
            Some(state) => state,
            None => return Action::Cleanup,
        };

        match decide(state) {
            Action::SearchKeyword { keyword } => {
                // A fresh search always lands on the first listing page; keep
                // the page cursor in step with what the adapter will show.
                if state.current_page != 1 {
                    state.current_page = 1;
                    state.touch();
                }
                Action::SearchKeyword { keyword }
            }
            Action::SwitchKeyword => self.move_to_next_keyword(),
            Action::GoNextPage => {
                self.move_to_next_page();
                Action::GoNextPage
            }
            other => other,
        }
    }

    /// Advance the keyword cursor, resetting page and result cursors. On
    /// exhaustion the session completes - the only place that happens.
    fn move_to_next_keyword(&mut self) -> Action {
        let state = match &mut self.state {
            Some(state) => state,
            None => return Action::Cleanup,
        };

        state.current_keyword_index += 1;
        state.current_page = 1;
        state.clear_snapshot();
        state.touch();

        match state.current_keyword() {
            Some(keyword) => {
                let keyword = keyword.to_string();
                tracing::info!("[Manager] Next keyword: {}", keyword);
                Action::SearchKeyword { keyword }
            }
            None => {
                state.status = SessionStatus::Completed;
                tracing::info!(
                    "[Manager] All keywords exhausted: {} processed, {} extracted",
                    state.processed_links_count,
                    state.extracted_info_count
                );
                Action::ShowResults
            }
        }
    }

    /// Advance the page cursor; a new listing snapshot must be captured
    /// before any further link is opened.
    fn move_to_next_page(&mut self) {
        if let Some(state) = &mut self.state {
            state.current_page += 1;
            state.clear_snapshot();
            state.touch();
            tracing::info!("[Manager] Next page: {}", state.current_page);
        }
    }
}
