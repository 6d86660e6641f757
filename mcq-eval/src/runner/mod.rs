//! Evaluation execution: extraction, retries, verification and the engine loop

pub mod engine;
pub mod extract;
pub mod rate_limiter;
pub mod retry;
pub mod verify;

pub use engine::{
    ConsoleProgress, EngineConfig, EvalError, EvaluationEngine, NoOpProgress, ProgressReporter,
    RunSummary,
};
pub use extract::{extract, extract_verdict, Marker, Verdict};
pub use rate_limiter::RateLimiter;
pub use retry::{Answered, AttemptError, CallError, RequestSettings, RetryPolicy, RetryingCaller};
pub use verify::verify_answer;

use std::fmt;

use crate::questions::LoadError;
use crate::store::StoreError;

/// Closed set of failure categories surfaced during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Question bank or results file could not be read or written. Fatal.
    IoFailure,
    /// A question record failed validation. That question is skipped.
    FormatFailure,
    /// Transport, HTTP or rate-limit error from the provider. Retried.
    ProviderFailure,
    /// Response carried no recognizable marker. Retried.
    ExtractionFailure,
    /// Attempt budget spent. The question is skipped for this run.
    Exhausted,
}

impl FailureKind {
    /// Whether this failure stops the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::IoFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::IoFailure => "io failure",
            FailureKind::FormatFailure => "format failure",
            FailureKind::ProviderFailure => "provider failure",
            FailureKind::ExtractionFailure => "extraction failure",
            FailureKind::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

impl From<&AttemptError> for FailureKind {
    fn from(e: &AttemptError) -> Self {
        match e {
            AttemptError::Provider(_) => FailureKind::ProviderFailure,
            AttemptError::Extraction { .. } => FailureKind::ExtractionFailure,
        }
    }
}

impl From<&StoreError> for FailureKind {
    fn from(_: &StoreError) -> Self {
        FailureKind::IoFailure
    }
}

impl From<&LoadError> for FailureKind {
    fn from(_: &LoadError) -> Self {
        FailureKind::IoFailure
    }
}

impl CallError {
    /// `None` for cancellation, which is not a failure
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            CallError::Exhausted { .. } => Some(FailureKind::Exhausted),
            CallError::Cancelled => None,
        }
    }
}
