//! Cross-context mailbox - the page marker protocol
//!
//! A detail context finishing its work cannot assume the listing context is
//! alive or attentive at that exact moment. Markers are therefore delivered
//! twice: once on a live broadcast channel, and once as a persisted mirror a
//! context created later can still observe. Correlation is by task id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::TaskId;
use crate::store::KeyValueStore;

/// Depth of the listing context (the paginated result list)
pub const LISTING_DEPTH: u8 = 1;
/// Depth of a detail context opened from one listing result
pub const DETAIL_DEPTH: u8 = 2;

/// Instruction or completion signal carried by a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerAction {
    /// Instruct a detail context to extract from its landing page
    Extract,
    /// A detail context finished; the listing may advance
    Next,
    CloseAll,
    Wait,
    SwitchTab,
    Refresh,
}

/// Coordination message passed between execution contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMarker {
    /// Depth of the sender context
    pub from: u8,
    /// Depth of the recipient context
    pub to: u8,
    pub action: MarkerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub task_id: TaskId,
    /// Opaque payload, e.g. an extracted-record count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PageMarker {
    /// Detail -> listing: extraction finished, advance
    pub fn next(task_id: TaskId, result_url: String, extracted: u64) -> Self {
        Self {
            from: DETAIL_DEPTH,
            to: LISTING_DEPTH,
            action: MarkerAction::Next,
            result_url: Some(result_url),
            keyword: None,
            task_id,
            data: Some(serde_json::json!({ "extracted": extracted })),
        }
    }

    /// Listing -> detail: extract from the landing page
    pub fn extract(task_id: TaskId, result_url: String, keyword: Option<String>) -> Self {
        Self {
            from: LISTING_DEPTH,
            to: DETAIL_DEPTH,
            action: MarkerAction::Extract,
            result_url: Some(result_url),
            keyword,
            task_id,
            data: None,
        }
    }

    /// Extracted-record count carried in `data`, if any
    pub fn extracted_count(&self) -> u64 {
        self.data
            .as_ref()
            .and_then(|d| d.get("extracted"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// Mailbox: live broadcast plus a persisted per-recipient mirror
pub struct CrossContextMailbox {
    kv: Arc<dyn KeyValueStore>,
    live: broadcast::Sender<PageMarker>,
}

impl CrossContextMailbox {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let (live, _) = broadcast::channel(64);
        Self { kv, live }
    }

    fn mirror_key(to: u8) -> String {
        format!("page_marker_d{to}")
    }

    /// Post a marker: mirror it first so a torn-down recipient can recover
    /// it later, then deliver live. Subscriber-less sends are fine.
    pub async fn post(&self, marker: PageMarker) {
        match serde_json::to_value(&marker) {
            Ok(value) => {
                if let Err(e) = self.kv.set(&Self::mirror_key(marker.to), value).await {
                    tracing::warn!("[Mailbox] Failed to mirror marker: {}", e);
                }
            }
            Err(e) => tracing::error!("[Mailbox] Failed to serialize marker: {}", e),
        }
        let _ = self.live.send(marker);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageMarker> {
        self.live.subscribe()
    }

    /// Consume the mirrored marker for a recipient depth, if it belongs to
    /// the given task. A mismatched marker is stale debris from an earlier
    /// session: it is cleared and dropped, never delivered.
    pub async fn take_pending(&self, to: u8, task_id: &str) -> Option<PageMarker> {
        let key = Self::mirror_key(to);
        let value = match self.kv.get(&key).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("[Mailbox] Failed to read mirror: {}", e);
                return None;
            }
        };

        self.clear(to).await;

        match serde_json::from_value::<PageMarker>(value) {
            Ok(marker) if marker.task_id == task_id => Some(marker),
            Ok(marker) => {
                tracing::warn!(
                    "[Mailbox] Dropping stale marker for task {} (current: {})",
                    marker.task_id,
                    task_id
                );
                None
            }
            Err(e) => {
                tracing::warn!("[Mailbox] Corrupt mirrored marker: {}", e);
                None
            }
        }
    }

    /// Clear the mirrored marker for a recipient depth
    pub async fn clear(&self, to: u8) {
        if let Err(e) = self.kv.remove(&Self::mirror_key(to)).await {
            tracing::warn!("[Mailbox] Failed to clear mirror: {}", e);
        }
    }
}
