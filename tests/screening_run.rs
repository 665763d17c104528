use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use screener_ai::config::MemorySettings;
use screener_ai::workflows::screening::{
    ChatMessage, CompletionBackend, CompletionError, CompletionProvider, Criterion,
    EvaluationPlan, FieldId, FieldValue, InputField, RecordAccessor, RecordId, RecordSource,
    RecordSourceError, ResultWriter, RunObserver, ScreeningService, WriteError,
    SKIP_EMPTY_DEPENDENCY,
};

struct TableRecord {
    id: RecordId,
    fields: BTreeMap<FieldId, String>,
}

impl RecordAccessor for TableRecord {
    fn id(&self) -> RecordId {
        self.id.clone()
    }

    fn text_value(&self, field: &FieldId) -> String {
        self.fields.get(field).cloned().unwrap_or_default()
    }
}

fn applicant(id: &str, values: &[(&str, &str)]) -> Arc<dyn RecordAccessor> {
    Arc::new(TableRecord {
        id: RecordId::new(id),
        fields: values
            .iter()
            .map(|(field, value)| (FieldId::new(*field), value.to_string()))
            .collect(),
    })
}

struct StaticTable {
    records: Vec<Arc<dyn RecordAccessor>>,
}

#[async_trait]
impl RecordSource for StaticTable {
    async fn all_records(
        &self,
        _fields: &[FieldId],
    ) -> Result<Vec<Arc<dyn RecordAccessor>>, RecordSourceError> {
        Ok(self.records.clone())
    }
}

#[derive(Default)]
struct ResultTable {
    created: Mutex<Vec<BTreeMap<FieldId, FieldValue>>>,
}

#[async_trait]
impl ResultWriter for ResultTable {
    async fn create_result(
        &self,
        fields: &BTreeMap<FieldId, FieldValue>,
    ) -> Result<(), WriteError> {
        self.created
            .lock()
            .expect("writer mutex poisoned")
            .push(fields.clone());
        Ok(())
    }
}

struct FixedScoreModel {
    score: u8,
}

#[async_trait]
impl CompletionBackend for FixedScoreModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
        Ok(format!(
            "The applicant looks reasonable.\nFINAL_RANKING = {}",
            self.score
        ))
    }

    fn label(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Default)]
struct ProgressLog {
    fractions: Mutex<Vec<f64>>,
    statuses: Mutex<Vec<String>>,
}

impl RunObserver for ProgressLog {
    fn on_progress(&self, fraction: f64) {
        self.fractions
            .lock()
            .expect("observer mutex poisoned")
            .push(fraction);
    }

    fn on_status(&self, message: &str) {
        self.statuses
            .lock()
            .expect("observer mutex poisoned")
            .push(message.to_string());
    }
}

fn screening_plan(second_criterion_gate: Option<&str>) -> EvaluationPlan {
    EvaluationPlan {
        preset_name: "engineering".to_string(),
        criteria: vec![
            Criterion {
                field: FieldId::new("fldExperience"),
                name: "Experience".to_string(),
                prompt: "Rate relevant engineering experience.".to_string(),
                depends_on: None,
            },
            Criterion {
                field: FieldId::new("fldWriting"),
                name: "Writing".to_string(),
                prompt: "Rate the writing sample.".to_string(),
                depends_on: second_criterion_gate.map(FieldId::new),
            },
        ],
        input_fields: vec![
            InputField {
                field: FieldId::new("fldName"),
                display_name: "Name".to_string(),
            },
            InputField {
                field: FieldId::new("fldWritingSample"),
                display_name: "Writing sample".to_string(),
            },
        ],
        applicant_link_field: FieldId::new("fldApplicant"),
        logs_field: Some(FieldId::new("fldLogs")),
    }
}

fn build_service(
    plan: EvaluationPlan,
    records: Vec<Arc<dyn RecordAccessor>>,
) -> (ScreeningService<ResultTable, StaticTable>, Arc<ResultTable>) {
    let provider = Arc::new(CompletionProvider::new(
        Arc::new(FixedScoreModel { score: 4 }),
        8,
    ));
    let writer = Arc::new(ResultTable::default());
    let source = Arc::new(StaticTable { records });
    let store = Arc::new(MemorySettings::new());
    let service = ScreeningService::new(plan, provider, writer.clone(), source, store);
    (service, writer)
}

fn score_of(fields: &BTreeMap<FieldId, FieldValue>, field: &str) -> Option<i64> {
    match fields.get(&FieldId::new(field)) {
        Some(FieldValue::Number(score)) => Some(*score),
        _ => None,
    }
}

#[tokio::test]
async fn gated_criterion_skips_only_where_its_field_is_empty() {
    let plan = screening_plan(Some("fldWritingSample"));
    let applicants = vec![
        applicant("rec1", &[("fldName", "Ada Lovelace")]),
        applicant(
            "rec2",
            &[("fldName", "Grace Hopper"), ("fldWritingSample", "An essay.")],
        ),
    ];
    let (service, writer) = build_service(plan, Vec::new());
    let observer = Arc::new(ProgressLog::default());

    let summary = service
        .run(applicants, observer.clone())
        .await
        .expect("run completes");

    assert_eq!(summary.planned, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0, "no applicant is fully skipped");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(service.ledger().count().expect("ledger reads"), 0);

    let created = writer.created.lock().expect("writer mutex poisoned").clone();
    assert_eq!(created.len(), 2);

    let rec1 = created
        .iter()
        .find(|fields| {
            fields.get(&FieldId::new("fldApplicant"))
                == Some(&FieldValue::LinkedRecord(RecordId::new("rec1")))
        })
        .expect("rec1 written");
    assert_eq!(score_of(rec1, "fldExperience"), Some(4));
    assert_eq!(score_of(rec1, "fldWriting"), None, "gated criterion skipped");

    let rec2 = created
        .iter()
        .find(|fields| {
            fields.get(&FieldId::new("fldApplicant"))
                == Some(&FieldValue::LinkedRecord(RecordId::new("rec2")))
        })
        .expect("rec2 written");
    assert_eq!(score_of(rec2, "fldExperience"), Some(4));
    assert_eq!(score_of(rec2, "fldWriting"), Some(4));

    // Exactly one skip across the whole run, and it is explained in logs.
    let skip_mentions: usize = created
        .iter()
        .filter_map(|fields| match fields.get(&FieldId::new("fldLogs")) {
            Some(FieldValue::Text(logs)) => Some(logs.matches(SKIP_EMPTY_DEPENDENCY).count()),
            _ => None,
        })
        .sum();
    assert_eq!(skip_mentions, 1);
}

#[tokio::test]
async fn blank_records_run_in_full_when_nothing_is_gated() {
    let plan = screening_plan(None);
    let applicants = vec![applicant("rec3", &[])];
    let (service, writer) = build_service(plan, Vec::new());

    let summary = service
        .run(applicants, Arc::new(ProgressLog::default()))
        .await
        .expect("run completes");

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.succeeded, 1);

    let created = writer.created.lock().expect("writer mutex poisoned").clone();
    assert_eq!(created.len(), 1);
    assert_eq!(score_of(&created[0], "fldExperience"), Some(4));
    assert_eq!(score_of(&created[0], "fldWriting"), Some(4));
}

#[tokio::test]
async fn progress_is_monotonic_and_finishes_at_one() {
    let plan = screening_plan(Some("fldWritingSample"));
    let applicants: Vec<Arc<dyn RecordAccessor>> = (0..7)
        .map(|i| applicant(&format!("rec{i}"), &[("fldName", "Applicant")]))
        .collect();
    let (service, _writer) = build_service(plan, Vec::new());
    let observer = Arc::new(ProgressLog::default());

    service
        .run(applicants, observer.clone())
        .await
        .expect("run completes");

    let fractions = observer
        .fractions
        .lock()
        .expect("observer mutex poisoned")
        .clone();
    assert!(!fractions.is_empty());
    assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1] + 1e-9));
    assert!((fractions.last().copied().expect("final fraction") - 1.0).abs() < 1e-9);

    let statuses = observer
        .statuses
        .lock()
        .expect("observer mutex poisoned")
        .clone();
    assert!(statuses
        .first()
        .expect("first status")
        .starts_with("Scanning"));
    assert!(statuses
        .last()
        .expect("final status")
        .starts_with("Run complete:"));
}
