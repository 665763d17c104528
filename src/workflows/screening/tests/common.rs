use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::MemorySettings;
use crate::workflows::screening::domain::{
    Criterion, EvaluationPlan, FieldId, InputField, RecordId,
};
use crate::workflows::screening::progress::RunObserver;
use crate::workflows::screening::provider::{
    ChatMessage, CompletionBackend, CompletionError, CompletionProvider, MessageRole,
};
use crate::workflows::screening::records::{RecordAccessor, RecordSource, RecordSourceError};
use crate::workflows::screening::scheduler::RunTimeouts;
use crate::workflows::screening::service::ScreeningService;
use crate::workflows::screening::writer::{FieldValue, ResultWriter, WriteError};

pub(super) fn input_fields() -> Vec<InputField> {
    vec![
        InputField {
            field: FieldId::new("fldName"),
            display_name: "Name".to_string(),
        },
        InputField {
            field: FieldId::new("fldResume"),
            display_name: "Resume".to_string(),
        },
    ]
}

/// Two criteria: "Experience" runs unconditionally, "Writing" only when the
/// resume field is non-empty.
pub(super) fn gated_plan() -> EvaluationPlan {
    EvaluationPlan {
        preset_name: "default".to_string(),
        criteria: vec![
            Criterion {
                field: FieldId::new("fldExperience"),
                name: "Experience".to_string(),
                prompt: "Rate relevant experience.".to_string(),
                depends_on: None,
            },
            Criterion {
                field: FieldId::new("fldWriting"),
                name: "Writing".to_string(),
                prompt: "Rate writing quality.".to_string(),
                depends_on: Some(FieldId::new("fldResume")),
            },
        ],
        input_fields: input_fields(),
        applicant_link_field: FieldId::new("fldApplicant"),
        logs_field: Some(FieldId::new("fldLogs")),
    }
}

pub(super) fn ungated_plan() -> EvaluationPlan {
    let mut plan = gated_plan();
    for criterion in &mut plan.criteria {
        criterion.depends_on = None;
    }
    plan
}

pub(super) fn single_criterion_plan() -> EvaluationPlan {
    let mut plan = gated_plan();
    plan.criteria.truncate(1);
    plan
}

pub(super) struct MemoryRecord {
    id: RecordId,
    fields: BTreeMap<FieldId, String>,
}

impl RecordAccessor for MemoryRecord {
    fn id(&self) -> RecordId {
        self.id.clone()
    }

    fn text_value(&self, field: &FieldId) -> String {
        self.fields.get(field).cloned().unwrap_or_default()
    }
}

pub(super) fn record(id: &str, values: &[(&str, &str)]) -> Arc<dyn RecordAccessor> {
    Arc::new(MemoryRecord {
        id: RecordId::new(id),
        fields: values
            .iter()
            .map(|(field, value)| (FieldId::new(*field), value.to_string()))
            .collect(),
    })
}

pub(super) struct MemorySource {
    pub(super) records: Vec<Arc<dyn RecordAccessor>>,
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn all_records(
        &self,
        _fields: &[FieldId],
    ) -> Result<Vec<Arc<dyn RecordAccessor>>, RecordSourceError> {
        Ok(self.records.clone())
    }
}

#[derive(Default)]
pub(super) struct CapturingWriter {
    pub(super) created: Mutex<Vec<BTreeMap<FieldId, FieldValue>>>,
    pub(super) reject_first: AtomicUsize,
}

#[async_trait]
impl ResultWriter for CapturingWriter {
    async fn create_result(
        &self,
        fields: &BTreeMap<FieldId, FieldValue>,
    ) -> Result<(), WriteError> {
        if self
            .reject_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            return Err(WriteError::Unavailable("rate limited".to_string()));
        }
        self.created
            .lock()
            .expect("writer mutex poisoned")
            .push(fields.clone());
        Ok(())
    }
}

impl CapturingWriter {
    pub(super) fn created(&self) -> Vec<BTreeMap<FieldId, FieldValue>> {
        self.created.lock().expect("writer mutex poisoned").clone()
    }
}

/// Backend with a scripted reply queue falling back to a fixed reply, an
/// optional hang marker, and in-flight gauges.
pub(super) struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    default_reply: String,
    hang_marker: Option<String>,
    pub(super) calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub(super) max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub(super) fn scoring(score: u8) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: format!("Reasoned it through.\nFINAL_RANKING = {score}"),
            hang_marker: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Backend whose replies never contain the ranking marker.
    pub(super) fn refusing() -> Self {
        Self {
            default_reply: "I would rather not give a number.".to_string(),
            ..Self::scoring(3)
        }
    }

    pub(super) fn with_replies(mut self, replies: Vec<Result<String, CompletionError>>) -> Self {
        self.replies = Mutex::new(replies.into());
        self
    }

    /// Calls whose user message contains the marker never resolve.
    pub(super) fn with_hang_marker(mut self, marker: &str) -> Self {
        self.hang_marker = Some(marker.to_string());
        self
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let user = messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        if let Some(marker) = &self.hang_marker {
            if user.contains(marker.as_str()) {
                std::future::pending::<()>().await;
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(reply) = self
            .replies
            .lock()
            .expect("backend mutex poisoned")
            .pop_front()
        {
            return reply;
        }
        Ok(self.default_reply.clone())
    }

    fn label(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
pub(super) struct CapturingObserver {
    pub(super) progress: Mutex<Vec<f64>>,
    pub(super) statuses: Mutex<Vec<String>>,
}

impl CapturingObserver {
    pub(super) fn statuses(&self) -> Vec<String> {
        self.statuses.lock().expect("observer mutex poisoned").clone()
    }

    pub(super) fn progress(&self) -> Vec<f64> {
        self.progress.lock().expect("observer mutex poisoned").clone()
    }
}

impl RunObserver for CapturingObserver {
    fn on_progress(&self, fraction: f64) {
        self.progress
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

pub(super) struct Harness {
    pub(super) service: ScreeningService<CapturingWriter, MemorySource>,
    pub(super) writer: Arc<CapturingWriter>,
    pub(super) backend: Arc<ScriptedBackend>,
    pub(super) store: Arc<MemorySettings>,
}

pub(super) fn harness(
    plan: EvaluationPlan,
    backend: ScriptedBackend,
    source_records: Vec<Arc<dyn RecordAccessor>>,
) -> Harness {
    harness_with_store(plan, backend, source_records, Arc::new(MemorySettings::new()))
}

pub(super) fn harness_with_store(
    plan: EvaluationPlan,
    backend: ScriptedBackend,
    source_records: Vec<Arc<dyn RecordAccessor>>,
    store: Arc<MemorySettings>,
) -> Harness {
    let backend = Arc::new(backend);
    let provider = Arc::new(CompletionProvider::new(backend.clone(), 8));
    let writer = Arc::new(CapturingWriter::default());
    let source = Arc::new(MemorySource {
        records: source_records,
    });
    let service = ScreeningService::with_timeouts(
        plan,
        provider,
        writer.clone(),
        source,
        store.clone(),
        RunTimeouts::default(),
    );
    Harness {
        service,
        writer,
        backend,
        store,
    }
}
