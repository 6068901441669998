//! Decision engine - the pure `state -> Action` function
//!
//! An order-sensitive rule list, first match wins. The ordering encodes the
//! crawl priority: finish the current page's items before paginating, finish
//! all pages of a keyword before switching, declare completion only when the
//! whole cross-product has been visited.
//!
//! No side effects and no I/O: after a cold restart the same state must
//! produce the same action - resumability depends on this determinism.

use serde::{Deserialize, Serialize};

use crate::state::{AutomationState, ResultItem, SessionStatus};

/// What the orchestrator should do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Paused (user or CAPTCHA); wait for an explicit resume
    WaitForUnblock,
    /// Stale or out-of-place signal; tidy up, touch nothing
    Cleanup,
    /// The cross-product is exhausted; surface the collected results
    ShowResults,
    /// A detail operation is outstanding; never open a second one
    AwaitLanding,
    SearchKeyword { keyword: String },
    OpenNextLink { item: ResultItem },
    GoNextPage,
    SwitchKeyword,
}

/// Compute the next action for a state. Pure.
pub fn decide(state: &AutomationState) -> Action {
    if state.status == SessionStatus::Paused {
        return Action::WaitForUnblock;
    }
    if state.status == SessionStatus::Idle {
        // Terminal for autonomous progress; only UserStart leaves it.
        return Action::Cleanup;
    }
    if state.status == SessionStatus::Completed {
        return Action::ShowResults;
    }
    if state.current_operating_url.is_some() {
        return Action::AwaitLanding;
    }
    if state.current_results.is_empty() {
        return match state.current_keyword() {
            Some(keyword) => Action::SearchKeyword {
                keyword: keyword.to_string(),
            },
            None => Action::ShowResults,
        };
    }
    if state.current_result_index < state.total_results_count {
        if let Some(item) = state.current_result() {
            return Action::OpenNextLink { item: item.clone() };
        }
    }
    if state.current_page < state.settings.max_pages_per_keyword {
        return Action::GoNextPage;
    }
    if state.current_keyword_index + 1 < state.keywords.len() {
        return Action::SwitchKeyword;
    }
    Action::ShowResults
}
