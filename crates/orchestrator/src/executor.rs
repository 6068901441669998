//! Action executor - the only component that touches the page adapter
//!
//! Translates a decided `Action` into adapter calls and feeds the resulting
//! signals back into the event loop. Site-specific behavior lives entirely
//! behind the `PageAdapter` trait; the orchestration core never holds a live
//! page handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::decision::Action;
use crate::error::{CrawlError, Result};
use crate::events::CrawlEvent;
use crate::mailbox::{CrossContextMailbox, PageMarker, LISTING_DEPTH};
use crate::state::{AutomationState, ResultItem};
use crate::supervisor::TimeoutSupervisor;

/// Visual status applied to a listing entry. Feedback only, never state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStyle {
    Visiting,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractOptions {
    pub keyword: Option<String>,
    pub max_records: Option<usize>,
}

/// One record pulled from a landing page; the extraction heuristics behind
/// it are pluggable and opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub source_url: String,
    pub data: Value,
}

/// Site-specific capability set consumed by the executor
///
/// `perform_search` and `click_next_page` may trigger navigation and replace
/// the calling execution context; nothing here may be assumed to survive
/// them except what was persisted beforehand.
#[async_trait]
pub trait PageAdapter: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    async fn perform_search(&self, keyword: &str) -> Result<()>;

    async fn get_search_result_links(&self) -> Result<Vec<ResultItem>>;

    async fn has_next_page(&self) -> Result<bool>;

    async fn click_next_page(&self) -> Result<()>;

    /// Returns true when a CAPTCHA is blocking the page
    async fn check_and_handle_captcha(&self) -> Result<bool>;

    /// Open a listing result in a detail context
    async fn open_link(&self, url: &str) -> Result<()>;

    async fn extract_data_from_landing_page(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> Result<Vec<ExtractedRecord>>;

    /// Visual feedback on a listing entry; default no-op
    async fn apply_result_style(&self, external_ref: &str, style: ResultStyle) {
        let _ = (external_ref, style);
    }
}

pub struct ActionExecutor {
    adapter: Arc<dyn PageAdapter>,
    supervisor: Arc<TimeoutSupervisor>,
    mailbox: Arc<CrossContextMailbox>,
    events: mpsc::Sender<CrawlEvent>,
}

impl ActionExecutor {
    pub fn new(
        adapter: Arc<dyn PageAdapter>,
        supervisor: Arc<TimeoutSupervisor>,
        mailbox: Arc<CrossContextMailbox>,
        events: mpsc::Sender<CrawlEvent>,
    ) -> Self {
        Self {
            adapter,
            supervisor,
            mailbox,
            events,
        }
    }

    /// Perform one action against the adapter. Adapter failures are absorbed
    /// here: they are logged and converge onto the page-end or timeout path,
    /// never propagated up into the control loop.
    pub async fn execute(&self, action: Action, state: Option<&AutomationState>) {
        tracing::debug!("[Executor] {:?}", action);
        match (action, state) {
            (Action::SearchKeyword { keyword }, Some(state)) => {
                self.search(&keyword, state).await
            }
            (Action::GoNextPage, Some(state)) => self.paginate(state).await,
            (Action::OpenNextLink { item }, Some(state)) => self.open_link(item, state).await,
            (Action::WaitForUnblock, _) => {
                // Paused sessions hold no watchdogs.
                self.supervisor.disarm_all();
            }
            (Action::Cleanup, _) => {
                self.supervisor.disarm_all();
                self.mailbox.clear(LISTING_DEPTH).await;
            }
            (Action::ShowResults, _) => {
                self.supervisor.disarm_all();
            }
            (Action::AwaitLanding, _) => {
                // A detail context or its watchdog will move things along.
            }
            (Action::SwitchKeyword, _) => {
                // The manager translates keyword switches into cursor moves
                // before actions reach the executor.
                tracing::debug!("[Executor] SwitchKeyword reached executor, nothing to do");
            }
            (other, None) => {
                tracing::warn!("[Executor] {:?} with no session state, skipping", other);
            }
        }
    }

    async fn search(&self, keyword: &str, state: &AutomationState) {
        let budget = Duration::from_millis(state.settings.serp_link_timeout_ms);
        if let Err(e) = bounded(budget, self.adapter.perform_search(keyword)).await {
            tracing::warn!("[Executor] Search for {:?} failed: {}", keyword, e);
            self.send(CrawlEvent::PageEnd).await;
            return;
        }
        // A block presents itself on the freshly loaded listing.
        if self.captcha_blocked(budget).await {
            return;
        }
        self.capture_listing(budget).await;
    }

    async fn paginate(&self, state: &AutomationState) {
        let budget = Duration::from_millis(state.settings.serp_link_timeout_ms);
        match bounded(budget, self.adapter.has_next_page()).await {
            Ok(true) => {}
            Ok(false) => {
                self.send(CrawlEvent::PageEnd).await;
                return;
            }
            Err(e) => {
                tracing::warn!("[Executor] has_next_page failed: {}", e);
                self.send(CrawlEvent::PageEnd).await;
                return;
            }
        }

        if let Err(e) = bounded(budget, self.adapter.click_next_page()).await {
            tracing::warn!("[Executor] Pagination failed: {}", e);
            self.send(CrawlEvent::PageEnd).await;
            return;
        }
        if self.captcha_blocked(budget).await {
            return;
        }
        self.capture_listing(budget).await;
    }

    /// Collect the fresh listing snapshot. An empty listing is treated as
    /// adapter ground truth that this page has nothing to visit.
    async fn capture_listing(&self, budget: Duration) {
        match bounded(budget, self.adapter.get_search_result_links()).await {
            Ok(results) if results.is_empty() => {
                tracing::info!("[Executor] Listing is empty");
                self.send(CrawlEvent::PageEnd).await;
            }
            Ok(results) => {
                self.send(CrawlEvent::SerpReady { results }).await;
            }
            Err(e) => {
                tracing::warn!("[Executor] Failed to collect listing: {}", e);
                self.send(CrawlEvent::PageEnd).await;
            }
        }
    }

    /// Open one listing result: record the in-flight operation, arm the
    /// watchdog, then hand the landing work to a detail context. The detail
    /// context reports back through the mailbox, never through return values,
    /// because its lifetime is independent of ours.
    async fn open_link(&self, item: ResultItem, state: &AutomationState) {
        self.send(CrawlEvent::LinkOpened {
            url: item.url.clone(),
        })
        .await;
        self.adapter
            .apply_result_style(&item.external_ref, ResultStyle::Visiting)
            .await;

        self.supervisor.arm(
            &item.url,
            Duration::from_millis(state.settings.landing_page_timeout_ms),
            CrawlEvent::LandingTimeout {
                target_url: item.url.clone(),
            },
        );

        let adapter = self.adapter.clone();
        let mailbox = self.mailbox.clone();
        let task_id = state.task_id.clone();
        let options = ExtractOptions {
            keyword: state.current_keyword().map(str::to_string),
            max_records: None,
        };

        tokio::spawn(async move {
            if let Err(e) = adapter.open_link(&item.url).await {
                tracing::warn!("[Executor] Failed to open {}: {}", item.url, e);
                adapter
                    .apply_result_style(&item.external_ref, ResultStyle::Failed)
                    .await;
                // No marker: the watchdog advances past this item.
                return;
            }

            match adapter
                .extract_data_from_landing_page(&item.url, &options)
                .await
            {
                Ok(records) => {
                    tracing::info!(
                        "[Executor] Detail context extracted {} record(s) from {}",
                        records.len(),
                        item.url
                    );
                    adapter
                        .apply_result_style(&item.external_ref, ResultStyle::Done)
                        .await;
                    mailbox
                        .post(PageMarker::next(task_id, item.url, records.len() as u64))
                        .await;
                }
                Err(e) => {
                    tracing::warn!("[Executor] Extraction failed on {}: {}", item.url, e);
                    adapter
                        .apply_result_style(&item.external_ref, ResultStyle::Failed)
                        .await;
                }
            }
        });
    }

    async fn captcha_blocked(&self, budget: Duration) -> bool {
        match bounded(budget, self.adapter.check_and_handle_captcha()).await {
            Ok(true) => {
                tracing::warn!("[Executor] CAPTCHA on {}", self.adapter.name());
                self.send(CrawlEvent::CaptchaDetected).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("[Executor] CAPTCHA check failed: {}", e);
                false
            }
        }
    }

    async fn send(&self, event: CrawlEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("[Executor] Event loop gone");
        }
    }
}

/// Bound an inline adapter call so a hung page cannot stall the loop
async fn bounded<T>(
    budget: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(CrawlError::Adapter(format!(
            "adapter call exceeded {budget:?}"
        ))),
    }
}
