//! Crawl Orchestration - session state machine for SERP data collection
//!
//! This crate drives a keyword / page / result crawl as an event-sourced
//! state machine. Page interaction is kept behind the [`PageAdapter`]
//! trait so the orchestration logic is testable without a browser.
//!
//! # Architecture
//!
//! 1. **State is data**: [`AutomationState`] is a plain serializable struct,
//!    persisted after every mutation so any successor context can resume
//! 2. **Decisions are pure**: [`decision::decide`] maps a state snapshot to
//!    exactly one [`Action`], with no I/O and no side effects
//! 3. **One writer**: every mutation flows through
//!    [`AutomationStateManager::handle_event`] on a single event loop

pub mod decision;
pub mod error;
pub mod events;
pub mod executor;
pub mod mailbox;
pub mod manager;
pub mod session;
pub mod state;
pub mod store;
pub mod supervisor;

pub use decision::{decide, Action};
pub use error::{CrawlError, Result};
pub use events::{CrawlEvent, EventBus, SessionNotice};
pub use executor::{ActionExecutor, ExtractOptions, ExtractedRecord, PageAdapter, ResultStyle};
pub use mailbox::{CrossContextMailbox, MarkerAction, PageMarker, DETAIL_DEPTH, LISTING_DEPTH};
pub use manager::AutomationStateManager;
pub use session::CrawlSession;
pub use state::{AutomationState, ResultItem, SessionSettings, SessionStatus};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StateStore};

pub use supervisor::TimeoutSupervisor;
