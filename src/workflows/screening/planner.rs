use std::collections::BTreeMap;
use std::sync::Arc;

use super::domain::{EvaluationPlan, FieldId};
use super::progress::{RunObserver, SCAN_SHARE};
use super::records::RecordAccessor;

/// Reason attached to criteria skipped by dependency gating.
pub const SKIP_EMPTY_DEPENDENCY: &str = "Skipped because the required input field was empty.";

/// Records scanned between progress reports and event-loop yields; the scan
/// runs synchronously over potentially thousands of in-memory records.
pub const SCAN_CHUNK: usize = 100;

/// Partition of a run's records into evaluable and fully skipped sets.
pub struct PlannedWork {
    pub to_process: Vec<Arc<dyn RecordAccessor>>,
    pub skipped: Vec<Arc<dyn RecordAccessor>>,
}

/// Precomputed dependency gating for one plan.
///
/// A record is fully skipped only when every criterion is gated and all of
/// its gating fields are empty; a criterion without a dependency always
/// keeps its record evaluable.
pub struct DependencyPlanner {
    gated: BTreeMap<FieldId, Vec<FieldId>>,
    ungated: usize,
}

impl DependencyPlanner {
    pub fn new(plan: &EvaluationPlan) -> Self {
        let mut gated: BTreeMap<FieldId, Vec<FieldId>> = BTreeMap::new();
        let mut ungated = 0;
        for criterion in &plan.criteria {
            match &criterion.depends_on {
                Some(gate) => gated
                    .entry(gate.clone())
                    .or_default()
                    .push(criterion.field.clone()),
                None => ungated += 1,
            }
        }
        Self { gated, ungated }
    }

    /// Coarse, applicant-level partition. When no criterion is gated every
    /// record is evaluable without a single field read (the common path).
    pub async fn partition(
        &self,
        records: Vec<Arc<dyn RecordAccessor>>,
        observer: &dyn RunObserver,
    ) -> PlannedWork {
        let total = records.len().max(1);
        let fully_skippable = !self.gated.is_empty() && self.ungated == 0;

        let mut work = PlannedWork {
            to_process: Vec::new(),
            skipped: Vec::new(),
        };

        for (scanned, record) in records.into_iter().enumerate() {
            if fully_skippable && !self.any_gate_present(record.as_ref()) {
                work.skipped.push(record);
            } else {
                work.to_process.push(record);
            }

            let scanned = scanned + 1;
            if scanned % SCAN_CHUNK == 0 || scanned == total {
                observer.on_progress(SCAN_SHARE * scanned as f64 / total as f64);
                tokio::task::yield_now().await;
            }
        }

        work
    }

    /// Fine-grained skip set for an evaluable record: every criterion whose
    /// own gating field is empty, regardless of other satisfied gates.
    pub fn skip_set(&self, record: &dyn RecordAccessor) -> BTreeMap<FieldId, String> {
        let mut skipped = BTreeMap::new();
        for (gate, criteria) in &self.gated {
            if record.text_value(gate).trim().is_empty() {
                for criterion_field in criteria {
                    skipped.insert(criterion_field.clone(), SKIP_EMPTY_DEPENDENCY.to_string());
                }
            }
        }
        skipped
    }

    fn any_gate_present(&self, record: &dyn RecordAccessor) -> bool {
        self.gated
            .keys()
            .any(|gate| !record.text_value(gate).trim().is_empty())
    }
}
