//! Results ledger: aggregate metadata plus one record per processed question

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{read_optional, timestamp, write_json_atomic, StoreError};
use crate::questions::{Choice, Question, QuestionId};
use crate::runner::extract::Verdict;

/// Which pipeline produced a results file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineVariant {
    /// Answer only
    Direct,
    /// Answer then verify
    Verified,
}

impl std::fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineVariant::Direct => write!(f, "direct"),
            PipelineVariant::Verified => write!(f, "verified"),
        }
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    pub total_questions: usize,
    pub questions_processed: usize,
    pub correct_answers: usize,
    /// Percentage in `[0, 100]`
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers_changed_by_verifier: Option<usize>,
}

/// The answer portion of a record, shaped by pipeline variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedAnswer {
    Verified {
        original_answer: Choice,
        verified_answer: Choice,
        was_changed: bool,
    },
    Direct {
        model_answer: Choice,
    },
}

impl RecordedAnswer {
    /// The letter that was scored
    pub fn scored(&self) -> Choice {
        match self {
            RecordedAnswer::Verified { verified_answer, .. } => *verified_answer,
            RecordedAnswer::Direct { model_answer } => *model_answer,
        }
    }

    pub fn variant(&self) -> PipelineVariant {
        match self {
            RecordedAnswer::Verified { .. } => PipelineVariant::Verified,
            RecordedAnswer::Direct { .. } => PipelineVariant::Direct,
        }
    }
}

/// Outcome for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    #[serde(rename = "id", alias = "question_id")]
    pub question_id: QuestionId,
    #[serde(flatten)]
    pub answer: RecordedAnswer,
    pub correct_answer: Choice,
    pub is_correct: bool,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn direct(question: &Question, model_answer: Choice) -> Self {
        Self::scored(question, RecordedAnswer::Direct { model_answer })
    }

    pub fn verified(question: &Question, original_answer: Choice, verdict: Verdict) -> Self {
        Self::scored(
            question,
            RecordedAnswer::Verified {
                original_answer,
                verified_answer: verdict.choice(),
                was_changed: verdict.was_changed(),
            },
        )
    }

    fn scored(question: &Question, answer: RecordedAnswer) -> Self {
        Self {
            question_id: question.id.clone(),
            is_correct: answer.scored() == question.correct_answer,
            answer,
            correct_answer: question.correct_answer,
            timestamp: Utc::now(),
        }
    }

    pub fn was_changed(&self) -> bool {
        matches!(self.answer, RecordedAnswer::Verified { was_changed: true, .. })
    }
}

/// On-disk shape of a results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub metadata: RunMetadata,
    pub processed_questions: Vec<ProcessedRecord>,
}

impl ResultsDocument {
    pub fn new(model: impl Into<String>, variant: PipelineVariant) -> Self {
        let now = Utc::now();
        Self {
            metadata: RunMetadata {
                model: model.into(),
                start_time: now,
                last_updated: now,
                total_questions: 0,
                questions_processed: 0,
                correct_answers: 0,
                accuracy: 0.0,
                answers_changed_by_verifier: match variant {
                    PipelineVariant::Verified => Some(0),
                    PipelineVariant::Direct => None,
                },
            },
            processed_questions: Vec::new(),
        }
    }

    /// Variant implied by the records, falling back to the metadata when empty
    pub fn variant(&self) -> PipelineVariant {
        match self.processed_questions.first() {
            Some(record) => record.answer.variant(),
            None if self.metadata.answers_changed_by_verifier.is_some() => PipelineVariant::Verified,
            None => PipelineVariant::Direct,
        }
    }

    /// `100 * correct / processed`, or 0 with nothing processed
    pub fn accuracy_of(correct: usize, processed: usize) -> f64 {
        if processed == 0 {
            0.0
        } else {
            correct as f64 / processed as f64 * 100.0
        }
    }

    fn push(&mut self, record: ProcessedRecord) {
        let meta = &mut self.metadata;
        meta.questions_processed += 1;
        if record.is_correct {
            meta.correct_answers += 1;
        }
        if record.was_changed() {
            *meta.answers_changed_by_verifier.get_or_insert(0) += 1;
        }
        meta.accuracy = Self::accuracy_of(meta.correct_answers, meta.questions_processed);
        self.processed_questions.push(record);
    }

    fn check(&self) -> Result<HashSet<QuestionId>, String> {
        let mut ids = HashSet::with_capacity(self.processed_questions.len());
        for record in &self.processed_questions {
            if !ids.insert(record.question_id.clone()) {
                return Err(format!("question {} recorded more than once", record.question_id));
            }
            if record.answer.variant() != self.variant() {
                return Err("records mix direct and verified answers".to_string());
            }
        }

        let meta = &self.metadata;
        let correct = self.processed_questions.iter().filter(|r| r.is_correct).count();
        if meta.questions_processed != self.processed_questions.len() || meta.correct_answers != correct {
            tracing::warn!(
                "Counters disagree with records (processed {} vs {}, correct {} vs {})",
                meta.questions_processed,
                self.processed_questions.len(),
                meta.correct_answers,
                correct
            );
        }
        Ok(ids)
    }
}

/// A results document bound to its file, with the set of processed ids
#[derive(Debug)]
pub struct ResultsStore {
    path: PathBuf,
    document: ResultsDocument,
    processed_ids: HashSet<QuestionId>,
}

impl ResultsStore {
    /// Load an existing results file, or start a fresh document if none exists.
    ///
    /// A file that exists but cannot be read or parsed is an error; it is never
    /// silently replaced.
    pub fn load_or_init(
        path: impl AsRef<Path>,
        model: &str,
        variant: PipelineVariant,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let Some(content) = read_optional(&path)? else {
            tracing::info!("No results at {}, starting fresh", path.display());
            return Ok(Self {
                path,
                document: ResultsDocument::new(model, variant),
                processed_ids: HashSet::new(),
            });
        };

        let corrupt = |message: String| StoreError::Corrupt {
            path: path.clone(),
            message,
        };
        let document: ResultsDocument =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        let processed_ids = document.check().map_err(corrupt)?;

        if document.metadata.model != model {
            tracing::warn!(
                "Results file was written for model {}, continuing with {}",
                document.metadata.model,
                model
            );
        }

        tracing::info!(
            "Loaded existing results: {} questions processed",
            processed_ids.len()
        );

        Ok(Self {
            path,
            document,
            processed_ids,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &ResultsDocument {
        &self.document
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.document.metadata
    }

    /// Set `total_questions` if it is still zero. Returns whether it changed.
    pub fn initialize_total(&mut self, total: usize) -> bool {
        if self.document.metadata.total_questions == 0 && total > 0 {
            self.document.metadata.total_questions = total;
            true
        } else {
            false
        }
    }

    /// Bind the document to a pipeline variant.
    ///
    /// Fails with the variant found on disk if existing records belong to the
    /// other pipeline. An empty document takes on the requested shape.
    pub fn adopt_variant(&mut self, variant: PipelineVariant) -> Result<(), PipelineVariant> {
        let found = self.document.variant();
        if !self.document.processed_questions.is_empty() && found != variant {
            return Err(found);
        }
        let changed = &mut self.document.metadata.answers_changed_by_verifier;
        match variant {
            PipelineVariant::Verified => {
                changed.get_or_insert(0);
            }
            PipelineVariant::Direct => *changed = None,
        }
        Ok(())
    }

    pub fn is_processed(&self, id: &QuestionId) -> bool {
        self.processed_ids.contains(id)
    }

    pub fn processed_ids(&self) -> &HashSet<QuestionId> {
        &self.processed_ids
    }

    /// Add a record and update the counters. Does not write to disk.
    pub fn append(&mut self, record: ProcessedRecord) -> Result<(), StoreError> {
        if self.processed_ids.contains(&record.question_id) {
            return Err(StoreError::Duplicate(record.question_id));
        }
        self.processed_ids.insert(record.question_id.clone());
        self.document.push(record);
        Ok(())
    }

    /// Stamp `last_updated` and replace the file atomically
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.document.metadata.last_updated = Utc::now();
        write_json_atomic(&self.path, &self.document)
    }
}
