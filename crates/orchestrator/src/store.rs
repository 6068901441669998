//! Durable key/value persistence
//!
//! One JSON blob per well-known key. Must be safe to call from a freshly
//! constructed context that has no prior in-memory state (cold start).
//!
//! Failure mode is deliberate: a failed save is logged and does not throw.
//! The in-memory state stays authoritative until the next successful save,
//! trading durability for liveness.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{CrawlError, Result};
use crate::state::AutomationState;

/// Well-known key for the automation record
pub const STATE_KEY: &str = "automation_state";

/// Backend-agnostic blob storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory backend for tests and single-process runs
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-per-key backend: `<dir>/<key>.json`
///
/// Keys are internal well-known identifiers, never user input.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CrawlError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CrawlError::Io(e)),
        }
    }
}

/// Typed wrapper around the blob store for the automation record
///
/// Absorbs persistence errors: `save` logs and returns, `load` logs and
/// yields None. The control loop never crashes over storage.
pub struct StateStore {
    kv: std::sync::Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(kv: std::sync::Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn load(&self) -> Option<AutomationState> {
        match self.kv.get(STATE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!("[StateStore] Corrupt automation record, ignoring: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("[StateStore] Load failed: {}", e);
                None
            }
        }
    }

    pub async fn save(&self, state: &AutomationState) {
        let value = match serde_json::to_value(state) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("[StateStore] Serialize failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.kv.set(STATE_KEY, value).await {
            // In-memory state stays authoritative; retried on next mutation.
            tracing::warn!("[StateStore] Save failed: {}", e);
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.kv.remove(STATE_KEY).await {
            tracing::warn!("[StateStore] Clear failed: {}", e);
        }
    }
}
