use std::sync::Arc;

use super::domain::Criterion;
use super::prompt::{self, PromptTemplate};
use super::provider::{ChatMessage, CompletionError, CompletionProvider};
use super::ranking::{RankingError, RankingParser};
use super::retry::{retry, RetryPolicy};

/// Score and audit transcript for one (applicant, criterion) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionOutcome {
    pub score: u8,
    pub transcript: String,
}

/// Attempt-cycle failures, tagged with the criterion name and applicant
/// label for operator diagnosis. Both kinds retry identically: the dominant
/// failure modes (format refusals, truncation, rate limiting) are transient.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("completion call failed for `{criterion}` ({applicant}): {source}")]
    Completion {
        criterion: String,
        applicant: String,
        #[source]
        source: CompletionError,
    },
    #[error("unusable response for `{criterion}` ({applicant}): {source}")]
    Ranking {
        criterion: String,
        applicant: String,
        #[source]
        source: RankingError,
    },
}

/// Runs the prompt → completion → parse → validate cycle for one
/// (applicant, criterion) pair at a time.
pub struct ItemEvaluator {
    provider: Arc<CompletionProvider>,
    template: PromptTemplate,
    parser: RankingParser,
    policy: RetryPolicy,
}

impl ItemEvaluator {
    pub fn new(provider: Arc<CompletionProvider>, template: PromptTemplate) -> Self {
        let parser = RankingParser::new(&template.ranking_keyword);
        Self {
            provider,
            template,
            parser,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Evaluate one criterion for one applicant. Retries are internal; the
    /// returned error is the last attempt's.
    pub async fn evaluate(
        &self,
        applicant_summary: &str,
        applicant_label: &str,
        criterion: &Criterion,
    ) -> Result<CriterionOutcome, EvaluationError> {
        let messages = prompt::build_messages(&self.template, criterion, applicant_summary);
        let messages = &messages;
        retry(self.policy, |attempt| async move {
            if attempt > 1 {
                tracing::debug!(
                    criterion = %criterion.name,
                    applicant = %applicant_label,
                    attempt,
                    "re-attempting evaluation"
                );
            }
            self.attempt(messages, applicant_label, criterion).await
        })
        .await
    }

    async fn attempt(
        &self,
        messages: &[ChatMessage],
        applicant_label: &str,
        criterion: &Criterion,
    ) -> Result<CriterionOutcome, EvaluationError> {
        let response = self.provider.complete(messages).await.map_err(|source| {
            EvaluationError::Completion {
                criterion: criterion.name.clone(),
                applicant: applicant_label.to_string(),
                source,
            }
        })?;

        let score = self
            .parser
            .parse(&response)
            .map_err(|source| EvaluationError::Ranking {
                criterion: criterion.name.clone(),
                applicant: applicant_label.to_string(),
                source,
            })?;

        Ok(CriterionOutcome {
            score,
            transcript: prompt::transcript(messages, &response),
        })
    }
}
