//! Sequential, resumable evaluation loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::retry::{CallError, RequestSettings, RetryPolicy, RetryingCaller};
use super::verify::verify_answer;
use super::FailureKind;
use crate::config::{default_results_path, Config, ConfigError};
use crate::prompts::answer_prompt;
use crate::providers::LLMProvider;
use crate::questions::{BankEntry, Question, QuestionBank, QuestionId};
use crate::store::{
    PipelineVariant, ProcessedRecord, RecordedAnswer, ResponseLog, ResultsStore, RunMetadata,
    StoreError,
};

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: RetryPolicy,
    pub request: RequestSettings,
    /// Run the verification stage after each answer
    pub verify: bool,
    /// Pause after each answered or skipped question
    pub question_delay: Duration,
    pub results_path: PathBuf,
    /// Optional detailed response log
    pub responses_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(results_path: impl Into<PathBuf>) -> Self {
        Self {
            policy: RetryPolicy::default(),
            request: RequestSettings::default(),
            verify: false,
            question_delay: Duration::from_secs(1),
            results_path: results_path.into(),
            responses_path: None,
        }
    }

    /// Build from the `[eval]` section and the named provider profile
    pub fn from_config(config: &Config, provider: &str) -> Result<Self, ConfigError> {
        let profile = config
            .get_provider(provider)
            .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))?;
        let eval = &config.eval;

        Ok(Self {
            policy: RetryPolicy::from_profile(profile),
            request: RequestSettings::from_profile(profile),
            verify: eval.verify,
            question_delay: Duration::from_millis(eval.question_delay_ms),
            results_path: eval.results_path(),
            responses_path: eval.responses_path.as_deref().map(PathBuf::from),
        })
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        if self.verify != verify && self.results_path == default_results_path(self.verify) {
            self.results_path = default_results_path(verify);
        }
        self.verify = verify;
        self
    }

    pub fn variant(&self) -> PipelineVariant {
        if self.verify {
            PipelineVariant::Verified
        } else {
            PipelineVariant::Direct
        }
    }
}

/// Fatal run errors. Per-question failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("results store failure: {0}")]
    Store(#[from] StoreError),

    #[error("{} holds {found} results, cannot continue it as a {expected} run", path.display())]
    VariantMismatch {
        path: PathBuf,
        found: PipelineVariant,
        expected: PipelineVariant,
    },
}

impl EvalError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EvalError::Store(e) => FailureKind::from(e),
            EvalError::VariantMismatch { .. } => FailureKind::IoFailure,
        }
    }
}

/// What happened during one call to [`EvaluationEngine::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Newly recorded this run
    pub recorded: usize,
    /// Exhausted this run, left for a later run
    pub skipped: usize,
    /// Already present in the results file
    pub already_processed: usize,
    /// Bank entries that failed validation
    pub malformed: usize,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
    /// Metadata as last saved
    pub metadata: RunMetadata,
}

/// Progress hooks for a run
pub trait ProgressReporter: Send + Sync {
    fn on_question_start(&self, id: &QuestionId, position: usize, total: usize);
    fn on_recorded(&self, record: &ProcessedRecord, metadata: &RunMetadata);
    fn on_skipped(&self, id: Option<&QuestionId>, kind: FailureKind, metadata: &RunMetadata);
    fn on_finished(&self, summary: &RunSummary);
}

/// Default no-op progress reporter
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    fn on_question_start(&self, _id: &QuestionId, _position: usize, _total: usize) {}
    fn on_recorded(&self, _record: &ProcessedRecord, _metadata: &RunMetadata) {}
    fn on_skipped(&self, _id: Option<&QuestionId>, _kind: FailureKind, _metadata: &RunMetadata) {}
    fn on_finished(&self, _summary: &RunSummary) {}
}

/// Console progress reporter
pub struct ConsoleProgress;

impl ConsoleProgress {
    fn print_stats(metadata: &RunMetadata) {
        println!(
            "  Processed: {}/{}",
            metadata.questions_processed, metadata.total_questions
        );
        println!("  Correct: {}", metadata.correct_answers);
        println!("  Accuracy: {:.2}%", metadata.accuracy);
        if let Some(changed) = metadata.answers_changed_by_verifier {
            println!("  Answers changed by verifier: {}", changed);
        }
    }
}

impl ProgressReporter for ConsoleProgress {
    fn on_question_start(&self, id: &QuestionId, position: usize, total: usize) {
        println!("\nQuestion {} ({}/{})", id, position, total);
    }

    fn on_recorded(&self, record: &ProcessedRecord, metadata: &RunMetadata) {
        let status = if record.is_correct { "CORRECT" } else { "WRONG" };
        match record.answer {
            RecordedAnswer::Verified {
                original_answer,
                verified_answer,
                was_changed,
            } => {
                let note = if was_changed { " (changed by verifier)" } else { "" };
                println!(
                    "  {} original {} -> verified {}{}, expected {}",
                    status, original_answer, verified_answer, note, record.correct_answer
                );
            }
            RecordedAnswer::Direct { model_answer } => {
                println!(
                    "  {} answered {}, expected {}",
                    status, model_answer, record.correct_answer
                );
            }
        }
        Self::print_stats(metadata);
    }

    fn on_skipped(&self, id: Option<&QuestionId>, kind: FailureKind, metadata: &RunMetadata) {
        match id {
            Some(id) => println!("  SKIPPED question {} ({})", id, kind),
            None => println!("  SKIPPED unidentified entry ({})", kind),
        }
        Self::print_stats(metadata);
    }

    fn on_finished(&self, summary: &RunSummary) {
        let state = if summary.cancelled { "interrupted" } else { "complete" };
        println!(
            "\nRun {}: {} recorded, {} skipped, {} already done, {} malformed",
            state, summary.recorded, summary.skipped, summary.already_processed, summary.malformed
        );
        Self::print_stats(&summary.metadata);
    }
}

/// Responses that produced a record
struct Resolved {
    record: ProcessedRecord,
    analysis: String,
    verification: Option<String>,
}

/// Drives one provider over a question bank, one question at a time
pub struct EvaluationEngine {
    provider: Arc<dyn LLMProvider>,
    config: EngineConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl EvaluationEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Model recorded in the results metadata
    pub fn model_name(&self) -> &str {
        self.config
            .request
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Process every unrecorded question in bank order.
    ///
    /// The results file is saved after each recorded question. Cancellation
    /// is observed before each question and during provider calls and delays;
    /// a cancelled run returns `Ok` with `cancelled` set.
    pub async fn run(
        &self,
        bank: &QuestionBank,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EvalError> {
        let variant = self.config.variant();
        let model = self.model_name().to_string();
        let path = &self.config.results_path;

        let mut store = ResultsStore::load_or_init(path, &model, variant)?;
        store
            .adopt_variant(variant)
            .map_err(|found| EvalError::VariantMismatch {
                path: path.clone(),
                found,
                expected: variant,
            })?;
        if store.initialize_total(bank.len()) {
            store.save()?;
        }

        let mut responses = self
            .config
            .responses_path
            .as_ref()
            .and_then(|p| match ResponseLog::open(p, &model) {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!("Response log disabled for this run: {}", e);
                    None
                }
            });

        let caller = RetryingCaller::new(self.provider.as_ref(), self.config.policy.clone())
            .with_request(self.config.request.clone())
            .with_cancellation(cancel.clone());

        tracing::info!(
            "Evaluating {} ({} run) on {} questions, {} already processed",
            model,
            variant,
            bank.len(),
            store.processed_ids().len()
        );

        let total = bank.len();
        let mut recorded = 0;
        let mut skipped = 0;
        let mut already_processed = 0;
        let mut malformed = 0;
        let mut cancelled = false;

        for (index, entry) in bank.entries().iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let question = match entry {
                BankEntry::Valid(q) => q,
                BankEntry::Malformed { index, id, reason } => {
                    tracing::warn!("Skipping malformed question at index {}: {}", index, reason);
                    malformed += 1;
                    self.progress
                        .on_skipped(id.as_ref(), FailureKind::FormatFailure, store.metadata());
                    continue;
                }
            };

            if store.is_processed(&question.id) {
                already_processed += 1;
                continue;
            }

            self.progress.on_question_start(&question.id, index + 1, total);

            tracing::info!("Processing question {}", question.id);
            match self.resolve(&caller, question).await {
                Ok(resolved) => {
                    store.append(resolved.record.clone())?;
                    store.save()?;
                    recorded += 1;

                    if let Some(log) = responses.as_mut() {
                        if let Err(e) = log.record(
                            &question.id,
                            &resolved.analysis,
                            resolved.verification.as_deref(),
                        ) {
                            tracing::warn!("Failed to save response log: {}", e);
                        }
                    }

                    self.progress.on_recorded(&resolved.record, store.metadata());
                }
                Err(CallError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(CallError::Exhausted { attempts, last }) => {
                    tracing::warn!(
                        "Skipping question {} after {} attempts: {}",
                        question.id,
                        attempts,
                        last
                    );
                    skipped += 1;
                    self.progress
                        .on_skipped(Some(&question.id), FailureKind::Exhausted, store.metadata());
                }
            }

            if !self.config.question_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = sleep(self.config.question_delay) => {}
                }
            }
        }

        if cancelled {
            tracing::info!("Run cancelled, results saved to {}", path.display());
        }

        let summary = RunSummary {
            recorded,
            skipped,
            already_processed,
            malformed,
            cancelled,
            metadata: store.metadata().clone(),
        };
        self.progress.on_finished(&summary);
        Ok(summary)
    }

    /// Answer, then verify if configured. Any exhaustion skips the question.
    async fn resolve(
        &self,
        caller: &RetryingCaller<'_>,
        question: &Question,
    ) -> Result<Resolved, CallError> {
        let answered = caller.call(&answer_prompt(question)).await?;
        tracing::info!("Extracted answer {} after {} attempt(s)", answered.value, answered.attempts);

        if !self.config.verify {
            return Ok(Resolved {
                record: ProcessedRecord::direct(question, answered.value),
                analysis: answered.text,
                verification: None,
            });
        }

        let verdict = verify_answer(caller, question, &answered.text, answered.value).await?;
        if verdict.value.was_changed() {
            tracing::info!(
                "Verifier changed answer {} -> {}",
                answered.value,
                verdict.value.choice()
            );
        } else {
            tracing::info!("Verifier confirmed answer {}", answered.value);
        }

        Ok(Resolved {
            record: ProcessedRecord::verified(question, answered.value, verdict.value),
            analysis: answered.text,
            verification: Some(verdict.text),
        })
    }
}
