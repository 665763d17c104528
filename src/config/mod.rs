use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// Process-wide key/value configuration boundary backed by the host
/// application (reads are synchronous, writes are not). Values are plain
/// JSON so callers layer their own typing on top.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;
}

/// Failures surfaced by a settings store implementation.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
    #[error("settings value could not be encoded: {0}")]
    Format(#[from] serde_json::Error),
}

/// In-process store for hosts without a native configuration backend, and
/// for tests.
#[derive(Default)]
pub struct MemorySettings {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .expect("settings mutex poisoned")
            .get(key)
            .cloned()
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.entries
            .lock()
            .expect("settings mutex poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}
