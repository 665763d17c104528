use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::{SettingsError, SettingsStore};

use super::domain::{EvaluationPlan, FailedApplicant, RecordId};
use super::records::{display_name, RecordAccessor};

pub(crate) const LEDGER_KEY: &str = "failed_applicants";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("could not persist failure ledger: {0}")]
    Store(#[from] SettingsError),
    #[error("stored failure ledger is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable record of applicants whose evaluation failed irrecoverably,
/// persisted through the host settings store. Holds at most one entry per
/// record id.
#[derive(Clone)]
pub struct FailureLedger {
    store: Arc<dyn SettingsStore>,
    /// Serializes read-modify-write cycles; concurrent failures from one
    /// batch must not drop each other's entries.
    write_lock: Arc<Mutex<()>>,
}

impl FailureLedger {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn list(&self) -> Result<Vec<FailedApplicant>, LedgerError> {
        match self.store.get(LEDGER_KEY) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn count(&self) -> Result<usize, LedgerError> {
        Ok(self.list()?.len())
    }

    /// Record failures with a denormalized snapshot of the plan's input
    /// fields, replacing any previous entry for the same record.
    pub async fn add(
        &self,
        records: &[Arc<dyn RecordAccessor>],
        reason: &str,
        batch_number: u32,
        plan: &EvaluationPlan,
    ) -> Result<(), LedgerError> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list()?;
        for record in records {
            let entry = snapshot(record.as_ref(), reason, batch_number, plan);
            entries.retain(|existing| existing.record_id != entry.record_id);
            tracing::debug!(record = %entry.record_id.0, reason, "recording failed applicant");
            entries.push(entry);
        }
        self.save(entries).await
    }

    pub async fn remove(&self, record_ids: &[RecordId]) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list()?;
        entries.retain(|entry| !record_ids.contains(&entry.record_id));
        self.save(entries).await
    }

    pub async fn clear(&self) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        tracing::debug!("clearing failure ledger");
        self.save(Vec::new()).await
    }

    async fn save(&self, entries: Vec<FailedApplicant>) -> Result<(), LedgerError> {
        let value = serde_json::to_value(&entries)?;
        self.store.set(LEDGER_KEY, value).await?;
        Ok(())
    }
}

/// Denormalize the configured input fields at failure time so a retry does
/// not need the originating view.
fn snapshot(
    record: &dyn RecordAccessor,
    reason: &str,
    batch_number: u32,
    plan: &EvaluationPlan,
) -> FailedApplicant {
    let mut applicant_data = BTreeMap::new();
    for input in &plan.input_fields {
        let value = record.text_value(&input.field);
        if !value.trim().is_empty() {
            applicant_data.insert(input.display_name.clone(), value);
        }
    }

    let name = display_name(record, &plan.input_fields);
    let applicant_name = (name != record.id().0).then_some(name);

    FailedApplicant {
        record_id: record.id(),
        reason: reason.to_string(),
        failed_at: Utc::now(),
        batch_number,
        preset_name: plan.preset_name.clone(),
        applicant_name,
        applicant_data,
    }
}
