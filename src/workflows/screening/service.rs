use std::sync::Arc;

use crate::config::SettingsStore;

use super::domain::{EvaluationPlan, PlanError, RetryReport, RunSummary};
use super::ledger::{FailureLedger, LedgerError};
use super::planner::DependencyPlanner;
use super::progress::RunObserver;
use super::provider::CompletionProvider;
use super::records::{RecordAccessor, RecordSource, RecordSourceError};
use super::scheduler::{BatchScheduler, RunTimeouts};
use super::settings::RunSettings;
use super::writer::ResultWriter;

/// Error raised before or while orchestrating a run. Per-applicant
/// failures never surface here; they end up in the tallies and the ledger.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Records(#[from] RecordSourceError),
}

/// Service composing the planner, scheduler, evaluator, failure ledger,
/// and destination writer for screening runs.
pub struct ScreeningService<W, S> {
    plan: EvaluationPlan,
    planner: Arc<DependencyPlanner>,
    scheduler: BatchScheduler<W>,
    ledger: FailureLedger,
    source: Arc<S>,
}

impl<W, S> ScreeningService<W, S>
where
    W: ResultWriter,
    S: RecordSource,
{
    pub fn new(
        plan: EvaluationPlan,
        provider: Arc<CompletionProvider>,
        writer: Arc<W>,
        source: Arc<S>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self::with_timeouts(plan, provider, writer, source, store, RunTimeouts::default())
    }

    pub fn with_timeouts(
        plan: EvaluationPlan,
        provider: Arc<CompletionProvider>,
        writer: Arc<W>,
        source: Arc<S>,
        store: Arc<dyn SettingsStore>,
        timeouts: RunTimeouts,
    ) -> Self {
        let settings = RunSettings::new(store.clone());
        let planner = Arc::new(DependencyPlanner::new(&plan));
        let ledger = FailureLedger::new(store);
        let scheduler = BatchScheduler::new(
            provider,
            planner.clone(),
            writer,
            ledger.clone(),
            settings,
            timeouts,
        );

        Self {
            plan,
            planner,
            scheduler,
            ledger,
            source,
        }
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    /// Evaluate every record in the host's current view. Per-applicant
    /// errors are tallied and ledgered; only pre-flight validation aborts.
    pub async fn run(
        &self,
        records: Vec<Arc<dyn RecordAccessor>>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunSummary, ScreeningError> {
        self.plan.validate()?;

        let planned = records.len();
        observer.on_status(&format!("Scanning {planned} applicants"));
        let work = self.planner.partition(records, observer.as_ref()).await;
        let skipped = work.skipped.len();
        tracing::info!(
            planned,
            to_process = work.to_process.len(),
            skipped,
            "screening run planned"
        );

        let totals = self
            .scheduler
            .run(&self.plan, work.to_process, observer.clone())
            .await;

        let summary = RunSummary {
            planned,
            processed: totals.processed,
            succeeded: totals.succeeded,
            failed: totals.failed,
            skipped,
        };
        observer.on_progress(1.0);
        observer.on_status(&format!(
            "Run complete: {} succeeded, {} failed, {} skipped",
            summary.succeeded, summary.failed, summary.skipped
        ));
        Ok(summary)
    }

    /// Re-evaluate every ledger entry against a fresh full-table scan.
    /// Records that no longer exist are dropped from the ledger and counted
    /// separately; repeated failures replace their entry instead of piling
    /// up.
    pub async fn retry_failed(
        &self,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RetryReport, ScreeningError> {
        self.plan.validate()?;

        let entries = self.ledger.list()?;
        if entries.is_empty() {
            return Ok(RetryReport::default());
        }

        observer.on_status(&format!("Retrying {} failed applicants", entries.len()));
        // The full table, not the originating view: failed records are
        // retried regardless of current view membership.
        let all = self.source.all_records(&self.plan.input_field_ids()).await?;

        let mut report = RetryReport::default();
        for (index, entry) in entries.iter().enumerate() {
            let record = all
                .iter()
                .find(|record| record.id() == entry.record_id)
                .cloned();

            let Some(record) = record else {
                tracing::warn!(
                    record = %entry.record_id.0,
                    "ledger entry no longer exists in the table"
                );
                self.ledger
                    .remove(std::slice::from_ref(&entry.record_id))
                    .await?;
                report.missing += 1;
                observer.on_progress((index + 1) as f64 / entries.len() as f64);
                continue;
            };

            match self.scheduler.retry_one(&self.plan, record.clone()).await {
                Ok(()) => {
                    self.ledger
                        .remove(std::slice::from_ref(&entry.record_id))
                        .await?;
                    report.succeeded += 1;
                }
                Err(reason) => {
                    self.ledger
                        .add(
                            std::slice::from_ref(&record),
                            &reason,
                            entry.batch_number,
                            &self.plan,
                        )
                        .await?;
                    report.failed += 1;
                }
            }
            observer.on_progress((index + 1) as f64 / entries.len() as f64);
        }

        observer.on_status(&format!(
            "Retry complete: {} succeeded, {} failed, {} no longer found",
            report.succeeded, report.failed, report.missing
        ));
        Ok(report)
    }
}
