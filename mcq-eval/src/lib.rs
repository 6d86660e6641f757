//! Resumable multiple-choice evaluation harness
//!
//! This crate runs a bank of four-option questions against an LLM provider,
//! extracts the chosen letter from free-form responses, optionally asks a
//! verifier to confirm or override it, and keeps a results file that is saved
//! after every question so an interrupted run picks up where it left off.
//!
//! # Features
//!
//! - OpenAI-compatible (Groq, OpenAI), Anthropic and Gemini providers
//! - Bounded retries with a fixed per-provider delay
//! - Optional verification pass with `VERIFIED:` / `CHANGED:` verdicts
//! - Crash-safe, resumable JSON results with running accuracy
//!
//! # Example
//!
//! ```no_run
//! use mcq_eval::{
//!     config::Config,
//!     providers::create_provider,
//!     questions::load_question_bank,
//!     runner::{ConsoleProgress, EngineConfig, EvaluationEngine},
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default();
//!     let provider = create_provider("groq", &config)?;
//!     let bank = load_question_bank(&config.eval.questions_path)?;
//!
//!     let engine = EvaluationEngine::new(provider, EngineConfig::from_config(&config, "groq")?)
//!         .with_progress(Arc::new(ConsoleProgress));
//!     let summary = engine.run(&bank, CancellationToken::new()).await?;
//!     println!("Accuracy: {:.2}%", summary.metadata.accuracy);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod prompts;
pub mod providers;
pub mod questions;
pub mod runner;
pub mod store;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::{Config, EvalConfig, ProviderConfig, ProviderKind};
    pub use crate::providers::{
        create_provider, CompletionRequest, CompletionResponse, LLMProvider, ProviderError,
        ProviderResult,
    };
    pub use crate::questions::{
        load_question_bank, AnswerOptions, BankEntry, Choice, Question, QuestionBank, QuestionId,
    };
    pub use crate::runner::{
        EngineConfig, EvalError, EvaluationEngine, FailureKind, ProgressReporter, RetryPolicy,
        RunSummary,
    };
    pub use crate::store::{PipelineVariant, ProcessedRecord, ResultsDocument, ResultsStore};
}
