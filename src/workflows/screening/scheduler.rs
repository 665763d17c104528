use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

use super::domain::{EvaluationPlan, EvaluationResult, RecordId};
use super::evaluator::ItemEvaluator;
use super::ledger::FailureLedger;
use super::planner::DependencyPlanner;
use super::progress::{ProgressCounter, RunObserver, SilentObserver};
use super::prompt;
use super::provider::CompletionProvider;
use super::records::{display_name, RecordAccessor};
use super::retry::{retry, RetryPolicy};
use super::settings::RunSettings;
use super::writer::{self, ResultWriter, WriteError};

/// Reason recorded for applicants still unfinished when a batch expires.
pub const BATCH_TIMEOUT_REASON: &str = "Batch timeout";
/// Reason recorded when a single ledger retry exceeds its time bound.
pub const RETRY_TIMEOUT_REASON: &str = "Retry timeout";

/// Wall-clock bounds for a run; a single hanging call must not stall it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimeouts {
    pub batch: Duration,
    /// Per-record bound for the ledger retry pass; retries run one at a
    /// time, so this is much shorter than the batch bound.
    pub retry_item: Duration,
}

impl Default for RunTimeouts {
    fn default() -> Self {
        Self {
            batch: Duration::from_secs(5 * 60),
            retry_item: Duration::from_secs(60),
        }
    }
}

/// Applicants per batch: the live concurrency budget divided by the
/// fan-out per applicant, never zero.
pub fn batch_size(concurrency_budget: u32, criteria_count: usize) -> usize {
    (concurrency_budget as usize / criteria_count.max(1)).max(1)
}

/// Cumulative tallies across a run's batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Iterates batches sequentially, fanning each batch's applicants out
/// concurrently under the provider limiter, and routes failures into the
/// ledger. Batch N+1 never starts before batch N settles, timeout included.
pub struct BatchScheduler<W> {
    provider: Arc<CompletionProvider>,
    planner: Arc<DependencyPlanner>,
    writer: Arc<W>,
    ledger: FailureLedger,
    settings: RunSettings,
    timeouts: RunTimeouts,
    item_retry: RetryPolicy,
    write_retry: RetryPolicy,
}

impl<W: ResultWriter> BatchScheduler<W> {
    pub fn new(
        provider: Arc<CompletionProvider>,
        planner: Arc<DependencyPlanner>,
        writer: Arc<W>,
        ledger: FailureLedger,
        settings: RunSettings,
        timeouts: RunTimeouts,
    ) -> Self {
        Self {
            provider,
            planner,
            writer,
            ledger,
            settings,
            timeouts,
            item_retry: RetryPolicy::default(),
            write_retry: RetryPolicy::default(),
        }
    }

    pub async fn run(
        &self,
        plan: &EvaluationPlan,
        to_process: Vec<Arc<dyn RecordAccessor>>,
        observer: Arc<dyn RunObserver>,
    ) -> BatchTotals {
        let criteria_count = plan.criteria_count();
        let total = to_process.len();
        let progress = ProgressCounter::new(observer.clone(), (total * criteria_count) as u64);
        // The template is fixed for the run; the budget is not.
        let evaluator = ItemEvaluator::new(self.provider.clone(), self.settings.prompt_template())
            .with_retry_policy(self.item_retry);

        let mut totals = BatchTotals::default();
        let mut batch_number: u32 = 0;
        let mut index = 0;

        while index < total {
            // Fresh read so an operator's budget change applies next batch.
            let budget = self.settings.concurrency_budget();
            self.provider.set_concurrency(budget as usize);
            let size = batch_size(budget, criteria_count);

            let batch = &to_process[index..(index + size).min(total)];
            index += batch.len();
            batch_number += 1;

            let outcomes: Mutex<BTreeMap<RecordId, bool>> = Mutex::new(BTreeMap::new());
            let batch_work = join_all(batch.iter().map(|record| {
                self.evaluate_applicant(
                    plan,
                    &evaluator,
                    record.clone(),
                    batch_number,
                    &outcomes,
                    &progress,
                )
            }));

            // Losing the race abandons whatever is still in flight; late
            // completions cannot touch superseded state.
            if timeout(self.timeouts.batch, batch_work).await.is_err() {
                tracing::warn!(batch = batch_number, "batch timed out");
            }

            let settled = outcomes.into_inner().expect("outcome mutex poisoned");
            let mut timed_out = Vec::new();
            for record in batch {
                match settled.get(&record.id()) {
                    Some(true) => totals.succeeded += 1,
                    Some(false) => totals.failed += 1,
                    None => {
                        totals.failed += 1;
                        timed_out.push(record.clone());
                    }
                }
            }
            totals.processed += batch.len();

            if !timed_out.is_empty() {
                if let Err(err) = self
                    .ledger
                    .add(&timed_out, BATCH_TIMEOUT_REASON, batch_number, plan)
                    .await
                {
                    tracing::warn!(error = %err, "could not persist batch-timeout entries");
                }
            }

            // Cover units the abandoned evaluations never recorded.
            progress.settle((index * criteria_count) as u64);

            observer.on_status(&format!(
                "Batch {batch_number}: processed {}/{} applicants ({} succeeded, {} failed)",
                totals.processed, total, totals.succeeded, totals.failed
            ));
            tracing::info!(
                batch = batch_number,
                processed = totals.processed,
                succeeded = totals.succeeded,
                failed = totals.failed,
                "batch settled"
            );
        }

        totals
    }

    /// Re-evaluate a single ledger record under the retry time bound,
    /// writing the result on success. Returns the failure reason otherwise.
    pub async fn retry_one(
        &self,
        plan: &EvaluationPlan,
        record: Arc<dyn RecordAccessor>,
    ) -> Result<(), String> {
        let evaluator = ItemEvaluator::new(self.provider.clone(), self.settings.prompt_template())
            .with_retry_policy(self.item_retry);
        let progress = ProgressCounter::new(Arc::new(SilentObserver), plan.criteria_count() as u64);

        let attempt = self.try_applicant(plan, &evaluator, record.as_ref(), &progress);
        match timeout(self.timeouts.retry_item, attempt).await {
            Err(_) => Err(RETRY_TIMEOUT_REASON.to_string()),
            Ok(Err(reason)) => Err(reason),
            Ok(Ok(result)) => self
                .write_result(plan, &result)
                .await
                .map_err(|err| err.to_string()),
        }
    }

    async fn evaluate_applicant(
        &self,
        plan: &EvaluationPlan,
        evaluator: &ItemEvaluator,
        record: Arc<dyn RecordAccessor>,
        batch_number: u32,
        outcomes: &Mutex<BTreeMap<RecordId, bool>>,
        progress: &ProgressCounter,
    ) {
        let succeeded = match self
            .try_applicant(plan, evaluator, record.as_ref(), progress)
            .await
        {
            Ok(result) => match self.write_result(plan, &result).await {
                Ok(()) => true,
                Err(err) => {
                    let reason = err.to_string();
                    tracing::warn!(
                        applicant = %result.applicant.0,
                        error = %reason,
                        "result write failed"
                    );
                    self.record_failure(&record, &reason, batch_number, plan).await;
                    false
                }
            },
            Err(reason) => {
                self.record_failure(&record, &reason, batch_number, plan).await;
                false
            }
        };

        outcomes
            .lock()
            .expect("outcome mutex poisoned")
            .insert(record.id(), succeeded);
    }

    /// Evaluate every non-skipped criterion concurrently and assemble the
    /// applicant's result. One failed criterion fails the whole applicant;
    /// the first failure's text becomes the ledger reason.
    async fn try_applicant(
        &self,
        plan: &EvaluationPlan,
        evaluator: &ItemEvaluator,
        record: &dyn RecordAccessor,
        progress: &ProgressCounter,
    ) -> Result<EvaluationResult, String> {
        let label = display_name(record, &plan.input_fields);
        let summary = prompt::applicant_summary(record, &plan.input_fields);
        let skipped = self.planner.skip_set(record);

        let pending = plan
            .criteria
            .iter()
            .filter(|criterion| !skipped.contains_key(&criterion.field))
            .map(|criterion| {
                let label = &label;
                let summary = &summary;
                async move {
                    let outcome = evaluator.evaluate(summary, label, criterion).await;
                    progress.record_unit();
                    (criterion, outcome)
                }
            });

        let settled = join_all(pending).await;

        // Skipped criteria settle as attempts too, so the bar still reaches
        // 100%.
        for _ in 0..skipped.len() {
            progress.record_unit();
        }

        let mut scores = BTreeMap::new();
        let mut logs = BTreeMap::new();
        let mut failure: Option<String> = None;

        for (criterion, outcome) in settled {
            match outcome {
                Ok(outcome) => {
                    scores.insert(criterion.field.clone(), outcome.score);
                    logs.insert(criterion.field.clone(), outcome.transcript);
                }
                Err(err) => {
                    tracing::warn!(
                        criterion = %criterion.name,
                        applicant = %label,
                        error = %err,
                        "criterion evaluation failed"
                    );
                    if failure.is_none() {
                        failure = Some(err.to_string());
                    }
                }
            }
        }

        match failure {
            None => Ok(EvaluationResult {
                applicant: record.id(),
                scores,
                logs,
                skipped,
            }),
            Some(reason) => Err(reason),
        }
    }

    async fn write_result(
        &self,
        plan: &EvaluationPlan,
        result: &EvaluationResult,
    ) -> Result<(), WriteError> {
        let fields = writer::result_fields(plan, result);
        let fields = &fields;
        retry(self.write_retry, |_attempt| async move {
            self.writer.create_result(fields).await
        })
        .await
    }

    async fn record_failure(
        &self,
        record: &Arc<dyn RecordAccessor>,
        reason: &str,
        batch_number: u32,
        plan: &EvaluationPlan,
    ) {
        if let Err(err) = self
            .ledger
            .add(std::slice::from_ref(record), reason, batch_number, plan)
            .await
        {
            tracing::warn!(error = %err, "could not persist failure ledger entry");
        }
    }
}
