use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a column in the source or destination store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

/// Identifier for an applicant record in the source store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

/// Input column exposed to prompts, with its operator-facing name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    pub field: FieldId,
    pub display_name: String,
}

/// One scoring column: the criteria prompt that produces it, and an
/// optional input field gating whether it runs at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    /// Destination numeric column; doubles as the criterion's identity.
    pub field: FieldId,
    pub name: String,
    pub prompt: String,
    pub depends_on: Option<FieldId>,
}

/// Immutable description of one screening run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationPlan {
    pub preset_name: String,
    pub criteria: Vec<Criterion>,
    pub input_fields: Vec<InputField>,
    /// Link column pointing the result row back at the source applicant.
    pub applicant_link_field: FieldId,
    /// Optional column receiving the concatenated evaluation transcripts.
    pub logs_field: Option<FieldId>,
}

impl EvaluationPlan {
    /// Pre-flight validation; failures abort a run before any network call.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.criteria.is_empty() {
            return Err(PlanError::NoCriteria);
        }
        if self.input_fields.is_empty() {
            return Err(PlanError::NoInputFields);
        }
        for criterion in &self.criteria {
            if let Some(gate) = &criterion.depends_on {
                if !self.input_fields.iter().any(|input| &input.field == gate) {
                    return Err(PlanError::UnknownDependency {
                        criterion: criterion.name.clone(),
                        field: gate.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn criteria_count(&self) -> usize {
        self.criteria.len()
    }

    pub fn input_field_ids(&self) -> Vec<FieldId> {
        self.input_fields
            .iter()
            .map(|input| input.field.clone())
            .collect()
    }
}

/// Plan problems that make a run unstartable.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no scoring criteria configured")]
    NoCriteria,
    #[error("no input fields configured")]
    NoInputFields,
    #[error("criterion `{criterion}` depends on undeclared field {field:?}")]
    UnknownDependency { criterion: String, field: FieldId },
}

/// Scores, transcripts, and skip reasons for one applicant. The three maps
/// partition the plan's criterion set: every criterion lands in exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub applicant: RecordId,
    pub scores: BTreeMap<FieldId, u8>,
    pub logs: BTreeMap<FieldId, String>,
    pub skipped: BTreeMap<FieldId, String>,
}

/// Durable ledger entry carrying enough denormalized applicant data to
/// retry without the originating view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedApplicant {
    pub record_id: RecordId,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub batch_number: u32,
    pub preset_name: String,
    pub applicant_name: Option<String>,
    /// Input-field values keyed by display name, captured at failure time.
    pub applicant_data: BTreeMap<String, String>,
}

/// Cumulative tallies reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub planned: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome tallies for a ledger retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Ledger entries whose record no longer exists in the table.
    pub missing: usize,
}
