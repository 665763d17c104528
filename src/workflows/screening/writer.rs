use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Serialize;

use super::domain::{EvaluationPlan, EvaluationResult, FieldId, RecordId};

/// Value written into one destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldValue {
    Number(i64),
    Text(String),
    LinkedRecord(RecordId),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("destination store rejected the record: {0}")]
    Rejected(String),
    #[error("destination store unavailable: {0}")]
    Unavailable(String),
}

/// Destination-store boundary. Implementations are expected to retry
/// transient failures themselves; the scheduler wraps calls in its own
/// retry on top, since store-level rate limits are common.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    async fn create_result(
        &self,
        fields: &BTreeMap<FieldId, FieldValue>,
    ) -> Result<(), WriteError>;
}

/// Destination per-field size limit observed in practice.
pub const LOGS_FIELD_LIMIT: usize = 100_000;
/// Truncation point, leaving room for the marker.
pub const LOGS_TRUNCATE_AT: usize = 95_000;
pub const TRUNCATION_MARKER: &str = "\n\n[log truncated]";

/// Assemble the destination record: one numeric entry per scored criterion,
/// the applicant link, and the optional concatenated transcript column.
pub fn result_fields(
    plan: &EvaluationPlan,
    result: &EvaluationResult,
) -> BTreeMap<FieldId, FieldValue> {
    let mut fields = BTreeMap::new();
    for (criterion_field, score) in &result.scores {
        fields.insert(criterion_field.clone(), FieldValue::Number(i64::from(*score)));
    }
    fields.insert(
        plan.applicant_link_field.clone(),
        FieldValue::LinkedRecord(result.applicant.clone()),
    );
    if let Some(logs_field) = &plan.logs_field {
        fields.insert(
            logs_field.clone(),
            FieldValue::Text(combined_logs(plan, result)),
        );
    }
    fields
}

/// Per-criterion transcripts joined in declaration order. Skipped criteria
/// keep their reason visible so blank score columns stay explainable.
fn combined_logs(plan: &EvaluationPlan, result: &EvaluationResult) -> String {
    let mut combined = String::new();
    for criterion in &plan.criteria {
        let body = if let Some(transcript) = result.logs.get(&criterion.field) {
            transcript.trim_end()
        } else if let Some(reason) = result.skipped.get(&criterion.field) {
            reason.as_str()
        } else {
            continue;
        };
        if !combined.is_empty() {
            combined.push_str("\n\n");
        }
        write!(combined, "## {}\n{}", criterion.name, body).expect("write log section");
    }
    truncate_logs(combined)
}

fn truncate_logs(mut logs: String) -> String {
    if logs.len() <= LOGS_FIELD_LIMIT {
        return logs;
    }
    let mut cut = LOGS_TRUNCATE_AT;
    while !logs.is_char_boundary(cut) {
        cut -= 1;
    }
    logs.truncate(cut);
    logs.push_str(TRUNCATION_MARKER);
    logs
}
