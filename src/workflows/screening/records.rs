use std::sync::Arc;

use async_trait::async_trait;

use super::domain::{FieldId, InputField, RecordId};

/// Read-only view over one applicant record in the host store.
pub trait RecordAccessor: Send + Sync {
    fn id(&self) -> RecordId;

    /// Cell contents rendered as text; the empty string when blank.
    fn text_value(&self, field: &FieldId) -> String;
}

/// Full-table scan over the host store. Used by the retry pass, because a
/// failed record must be retried even after it left the originating view.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn all_records(
        &self,
        fields: &[FieldId],
    ) -> Result<Vec<Arc<dyn RecordAccessor>>, RecordSourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RecordSourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),
}

/// Operator-facing label for a record: the first non-empty configured input
/// field wins, falling back to the raw record id.
pub fn display_name(record: &dyn RecordAccessor, input_fields: &[InputField]) -> String {
    input_fields
        .iter()
        .map(|input| record.text_value(&input.field))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| record.id().0)
}
