use std::sync::Arc;

use crate::config::{SettingsError, SettingsStore};

use super::prompt::PromptTemplate;

pub(crate) const CONCURRENCY_KEY: &str = "concurrency_budget";
pub(crate) const TEMPLATE_KEY: &str = "prompt_template";

pub const DEFAULT_CONCURRENCY_BUDGET: u32 = 10;

/// Typed view over the host settings store. Values are read fresh on every
/// call so an operator's change applies without restarting the host.
#[derive(Clone)]
pub struct RunSettings {
    store: Arc<dyn SettingsStore>,
}

impl RunSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn concurrency_budget(&self) -> u32 {
        self.store
            .get(CONCURRENCY_KEY)
            .and_then(|value| value.as_u64())
            .map(|value| value.clamp(1, 1_000) as u32)
            .unwrap_or(DEFAULT_CONCURRENCY_BUDGET)
    }

    pub async fn set_concurrency_budget(&self, budget: u32) -> Result<(), SettingsError> {
        self.store
            .set(CONCURRENCY_KEY, serde_json::json!(budget))
            .await
    }

    /// Active prompt template, falling back to the built-in default when
    /// the stored one is absent or unreadable.
    pub fn prompt_template(&self) -> PromptTemplate {
        self.store
            .get(TEMPLATE_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub async fn set_prompt_template(&self, template: &PromptTemplate) -> Result<(), SettingsError> {
        let value = serde_json::to_value(template)?;
        self.store.set(TEMPLATE_KEY, value).await
    }
}
