//! Crawl session - command surface and the per-context event loop
//!
//! One `CrawlSession` embodies one execution context. Internally it is a
//! single cooperative loop: events arrive in order, the manager mutates and
//! persists, the executor acts. On construction the loop performs the
//! cold-start obligation: load state, consume any pending marker, and if the
//! session is non-terminal, decide and act.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::decision::Action;
use crate::error::{CrawlError, Result};
use crate::events::{CrawlEvent, EventBus, SessionNotice};
use crate::executor::{ActionExecutor, PageAdapter};
use crate::mailbox::{CrossContextMailbox, LISTING_DEPTH};
use crate::manager::AutomationStateManager;
use crate::state::{now_ms, AutomationState, SessionSettings, SessionStatus, TaskId};
use crate::store::{KeyValueStore, StateStore};
use crate::supervisor::TimeoutSupervisor;

pub struct CrawlSession {
    events: mpsc::Sender<CrawlEvent>,
    bus: Arc<EventBus>,
    snapshot: Arc<RwLock<Option<AutomationState>>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl CrawlSession {
    pub fn new(kv: Arc<dyn KeyValueStore>, adapter: Arc<dyn PageAdapter>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let supervisor = TimeoutSupervisor::new(event_tx.clone());
        let mailbox = Arc::new(CrossContextMailbox::new(kv.clone()));
        let executor = ActionExecutor::new(
            adapter,
            supervisor.clone(),
            mailbox.clone(),
            event_tx.clone(),
        );
        let manager = AutomationStateManager::new(StateStore::new(kv));
        let bus = Arc::new(EventBus::new());
        let snapshot = Arc::new(RwLock::new(None));

        // Forward markers addressed to the listing context into the loop.
        let listener = {
            let tx = event_tx.clone();
            let mut rx = mailbox.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(marker) if marker.to == LISTING_DEPTH => {
                            if tx.send(CrawlEvent::MarkerArrived(marker)).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {} // addressed to a detail context
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("[Session] Marker listener lagged by {}", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let event_loop = tokio::spawn(run_loop(
            manager,
            executor,
            supervisor,
            mailbox,
            event_rx,
            event_tx.clone(),
            bus.clone(),
            snapshot.clone(),
        ));

        Self {
            events: event_tx,
            bus,
            snapshot,
            tasks: vec![listener, event_loop],
        }
    }

    pub async fn start(&self, keywords: Vec<String>) -> Result<TaskId> {
        self.start_with(keywords, SessionSettings::default()).await
    }

    pub async fn start_with(
        &self,
        keywords: Vec<String>,
        settings: SessionSettings,
    ) -> Result<TaskId> {
        let task_id = Uuid::now_v7().to_string();
        self.send(CrawlEvent::UserStart {
            task_id: task_id.clone(),
            keywords,
            settings,
        })
        .await?;
        Ok(task_id)
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(CrawlEvent::UserPause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(CrawlEvent::UserResume).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(CrawlEvent::UserStop).await
    }

    /// Read-only snapshot of the automation record
    pub async fn state(&self) -> Option<AutomationState> {
        self.snapshot.read().await.clone()
    }

    /// Subscribe to observer notices (progress, completion, pauses)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.bus.subscribe()
    }

    /// Tear this context down, as a navigation would: abruptly. Persisted
    /// state and mirrored markers survive for the next context.
    pub async fn destroy(self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = futures_util::future::join_all(self.tasks).await;
    }

    async fn send(&self, event: CrawlEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| CrawlError::ChannelClosed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    mut manager: AutomationStateManager,
    executor: ActionExecutor,
    supervisor: Arc<TimeoutSupervisor>,
    mailbox: Arc<CrossContextMailbox>,
    mut event_rx: mpsc::Receiver<CrawlEvent>,
    event_tx: mpsc::Sender<CrawlEvent>,
    bus: Arc<EventBus>,
    snapshot: Arc<RwLock<Option<AutomationState>>>,
) {
    bootstrap(
        &mut manager,
        &executor,
        &supervisor,
        &mailbox,
        &event_tx,
        &snapshot,
    )
    .await;

    while let Some(event) = event_rx.recv().await {
        // Completion signals retire their watchdog before dispatch; the
        // mirror of a live-delivered marker is consumed here too. A marker
        // that is not for the live session's own in-flight operation must be
        // a full no-op: it may not touch the watchdog of whatever IS in
        // flight, or a hung successor operation would never time out.
        match &event {
            CrawlEvent::LandingProcessed { target_url, .. } => {
                supervisor.disarm(target_url);
            }
            CrawlEvent::MarkerArrived(marker) => {
                let current = manager.state().map_or(false, |s| {
                    s.task_id == marker.task_id
                        && s.current_operating_url.is_some()
                        && s.current_operating_url == marker.result_url
                });
                if current {
                    if let Some(url) = &marker.result_url {
                        supervisor.disarm(url);
                    }
                    mailbox.clear(LISTING_DEPTH).await;
                }
            }
            _ => {}
        }

        let action = manager.handle_event(event.clone()).await;
        let state = manager.state().cloned();
        *snapshot.write().await = state.clone();

        publish_notices(&bus, &event, action.as_ref(), state.as_ref());

        if let Some(action) = action {
            executor.execute(action, state.as_ref()).await;
        }
    }
}

/// Cold-start recovery: load, drain the mirrored marker, re-arm or act
async fn bootstrap(
    manager: &mut AutomationStateManager,
    executor: &ActionExecutor,
    supervisor: &Arc<TimeoutSupervisor>,
    mailbox: &Arc<CrossContextMailbox>,
    event_tx: &mpsc::Sender<CrawlEvent>,
    snapshot: &Arc<RwLock<Option<AutomationState>>>,
) {
    let resumed = manager.resume_from_cold().await;
    let state = manager.state().cloned();
    *snapshot.write().await = state.clone();

    let Some(state) = state else { return };

    match resumed {
        Some(Action::AwaitLanding) => {
            // A detail context may have finished the outstanding operation
            // while no listing context existed to hear about it.
            if let Some(marker) = mailbox.take_pending(LISTING_DEPTH, &state.task_id).await {
                tracing::info!("[Session] Recovered a pending marker from storage");
                let _ = event_tx.send(CrawlEvent::MarkerArrived(marker)).await;
                return;
            }

            // The operation outlived its context; give the watchdog the
            // remaining budget so progress stays bounded.
            if let (Some(url), Some(started)) = (
                state.current_operating_url.as_ref(),
                state.current_operation_start_time,
            ) {
                let elapsed = now_ms().saturating_sub(started);
                let remaining = state
                    .settings
                    .landing_page_timeout_ms
                    .saturating_sub(elapsed)
                    .max(1);
                tracing::info!(
                    "[Session] Re-arming watchdog for {} ({} ms left)",
                    url,
                    remaining
                );
                supervisor.arm(
                    url,
                    std::time::Duration::from_millis(remaining),
                    CrawlEvent::LandingTimeout {
                        target_url: url.clone(),
                    },
                );
            }
        }
        Some(action) => executor.execute(action, Some(&state)).await,
        None => {}
    }
}

fn publish_notices(
    bus: &EventBus,
    event: &CrawlEvent,
    action: Option<&Action>,
    state: Option<&AutomationState>,
) {
    let rejected = matches!(action, Some(Action::Cleanup));
    // Progress-bearing events only produce a notice when the manager
    // actually consumed them; a dropped stale signal must stay invisible
    // to observers too.
    let advanced = matches!(action, Some(a) if !matches!(a, Action::Cleanup));

    match event {
        CrawlEvent::UserStart { task_id, .. } if !rejected => {
            bus.publish(SessionNotice::Started {
                task_id: task_id.clone(),
            });
        }
        CrawlEvent::UserPause | CrawlEvent::CaptchaDetected if !rejected => {
            bus.publish(SessionNotice::Paused);
        }
        CrawlEvent::UserResume if !rejected => {
            bus.publish(SessionNotice::Resumed);
        }
        CrawlEvent::UserStop => {
            bus.publish(SessionNotice::Stopped);
        }
        CrawlEvent::SerpReady { results } if advanced => {
            if let Some(state) = state {
                bus.publish(SessionNotice::SerpCaptured {
                    keyword: state.current_keyword().unwrap_or_default().to_string(),
                    page: state.current_page,
                    count: results.len(),
                });
            }
        }
        CrawlEvent::LinkOpened { url }
            if action.is_none()
                && state.map_or(false, |s| {
                    s.current_operating_url.as_deref() == Some(url.as_str())
                }) =>
        {
            bus.publish(SessionNotice::LinkOpened { url: url.clone() });
        }
        CrawlEvent::LandingProcessed {
            target_url,
            extracted_count,
        } if advanced => {
            publish_landing(bus, state, target_url, *extracted_count, false);
        }
        CrawlEvent::MarkerArrived(marker) if advanced => {
            if let Some(url) = &marker.result_url {
                publish_landing(bus, state, url, marker.extracted_count(), false);
            }
        }
        CrawlEvent::LandingTimeout { target_url } if advanced => {
            publish_landing(bus, state, target_url, 0, true);
        }
        _ => {}
    }

    if let (Some(Action::ShowResults), Some(state)) = (action, state) {
        if state.status == SessionStatus::Completed {
            bus.publish(SessionNotice::Completed {
                processed: state.processed_links_count,
                extracted: state.extracted_info_count,
            });
        }
    }
}

fn publish_landing(
    bus: &EventBus,
    state: Option<&AutomationState>,
    url: &str,
    extracted: u64,
    timed_out: bool,
) {
    bus.publish(SessionNotice::LandingDone {
        url: url.to_string(),
        extracted,
        timed_out,
    });
    if let Some(state) = state {
        bus.publish(SessionNotice::Progress {
            processed: state.processed_links_count,
            extracted: state.extracted_info_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrawlResult;
    use crate::executor::{ExtractOptions, ExtractedRecord};
    use crate::mailbox::PageMarker;
    use crate::state::ResultItem;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    /// One keyword, one page, one result, one extracted record.
    struct TinyAdapter;

    #[async_trait]
    impl PageAdapter for TinyAdapter {
        fn name(&self) -> &str {
            "tiny"
        }

        async fn perform_search(&self, _keyword: &str) -> CrawlResult<()> {
            Ok(())
        }

        async fn get_search_result_links(&self) -> CrawlResult<Vec<ResultItem>> {
            Ok(vec![ResultItem {
                url: "https://example.com/only".to_string(),
                title: "only".to_string(),
                external_ref: "r0".to_string(),
            }])
        }

        async fn has_next_page(&self) -> CrawlResult<bool> {
            Ok(false)
        }

        async fn click_next_page(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn check_and_handle_captcha(&self) -> CrawlResult<bool> {
            Ok(false)
        }

        async fn open_link(&self, _url: &str) -> CrawlResult<()> {
            Ok(())
        }

        async fn extract_data_from_landing_page(
            &self,
            url: &str,
            _options: &ExtractOptions,
        ) -> CrawlResult<Vec<ExtractedRecord>> {
            Ok(vec![ExtractedRecord {
                source_url: url.to_string(),
                data: serde_json::json!({ "email": "hello@example.com" }),
            }])
        }
    }

    #[tokio::test]
    async fn test_single_result_session_completes() {
        let session = CrawlSession::new(Arc::new(MemoryStore::new()), Arc::new(TinyAdapter));
        let mut notices = session.subscribe();

        session.start(vec!["rust".to_string()]).await.unwrap();

        let completed = timeout(Duration::from_secs(5), async {
            loop {
                match notices.recv().await.unwrap() {
                    SessionNotice::Completed {
                        processed,
                        extracted,
                    } => break (processed, extracted),
                    _ => {}
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(completed, (1, 1));
        let state = session.state().await.unwrap();
        assert_eq!(state.status, SessionStatus::Completed);
        session.destroy().await;
    }

    /// First extraction completes late, after the run that requested it has
    /// been stopped; every later extraction hangs until the watchdog fires.
    struct RetryHangAdapter {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PageAdapter for RetryHangAdapter {
        fn name(&self) -> &str {
            "retry-hang"
        }

        async fn perform_search(&self, _keyword: &str) -> CrawlResult<()> {
            Ok(())
        }

        async fn get_search_result_links(&self) -> CrawlResult<Vec<ResultItem>> {
            Ok(vec![ResultItem {
                url: "https://example.com/only".to_string(),
                title: "only".to_string(),
                external_ref: "r0".to_string(),
            }])
        }

        async fn has_next_page(&self) -> CrawlResult<bool> {
            Ok(false)
        }

        async fn click_next_page(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn check_and_handle_captcha(&self) -> CrawlResult<bool> {
            Ok(false)
        }

        async fn open_link(&self, _url: &str) -> CrawlResult<()> {
            Ok(())
        }

        async fn extract_data_from_landing_page(
            &self,
            url: &str,
            _options: &ExtractOptions,
        ) -> CrawlResult<Vec<ExtractedRecord>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(700)).await;
                Ok(vec![ExtractedRecord {
                    source_url: url.to_string(),
                    data: serde_json::json!({ "late": true }),
                }])
            } else {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
        }
    }

    // A leftover marker from a stopped run carries the old task id; it must
    // not retire the restarted run's watchdog for the same URL.
    #[tokio::test]
    async fn test_marker_from_stopped_run_cannot_stall_restart() {
        let session = CrawlSession::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RetryHangAdapter {
                attempts: AtomicUsize::new(0),
            }),
        );
        let mut notices = session.subscribe();
        let settings = SessionSettings {
            landing_page_timeout_ms: 2_000,
            ..SessionSettings::default()
        };

        session
            .start_with(vec!["rust".to_string()], settings.clone())
            .await
            .unwrap();
        timeout(Duration::from_secs(5), async {
            loop {
                if let SessionNotice::LinkOpened { .. } = notices.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        // Stop while the first extraction is still in flight; its marker
        // lands after the restart below has its own operation outstanding.
        session.stop().await.unwrap();
        timeout(Duration::from_secs(5), async {
            loop {
                if let SessionNotice::Stopped = notices.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        session
            .start_with(vec!["rust".to_string()], settings)
            .await
            .unwrap();

        let completed = timeout(Duration::from_secs(8), async {
            loop {
                if let SessionNotice::Completed {
                    processed,
                    extracted,
                } = notices.recv().await.unwrap()
                {
                    break (processed, extracted);
                }
            }
        })
        .await
        .unwrap();

        // The hung second attempt times out; nothing was extracted.
        assert_eq!(completed, (1, 0));
        session.destroy().await;
    }

    #[tokio::test]
    async fn test_dropped_marker_emits_no_notice() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let mut state = AutomationState::new(
            "live-task".to_string(),
            vec!["rust".to_string()],
            SessionSettings::default(),
        );
        state.status = SessionStatus::Processing;
        state.current_operating_url = Some("https://example.com/0".to_string());

        // A marker the manager dropped (no action) stays invisible.
        let stale = PageMarker::next(
            "stale-task".to_string(),
            "https://example.com/0".to_string(),
            3,
        );
        publish_notices(&bus, &CrawlEvent::MarkerArrived(stale), None, Some(&state));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        // A consumed marker still announces the landing.
        let live = PageMarker::next(
            "live-task".to_string(),
            "https://example.com/0".to_string(),
            3,
        );
        publish_notices(
            &bus,
            &CrawlEvent::MarkerArrived(live),
            Some(&Action::GoNextPage),
            Some(&state),
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionNotice::LandingDone { extracted: 3, .. })
        ));
    }
}
