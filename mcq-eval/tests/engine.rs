//! End-to-end runs of the evaluation engine against scripted providers
//!
//! Each test works in its own temp directory; no network access is needed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mcq_eval::prelude::*;
use mcq_eval::runner::{NoOpProgress, RequestSettings};
use mcq_eval::store::{RecordedAnswer, RunMetadata};

const FIXTURES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Replies chosen by which question text appears in the prompt.
///
/// Answer replies are consumed in order; the last one repeats.
#[derive(Default)]
struct ScriptedProvider {
    answers: Vec<(&'static str, Mutex<VecDeque<&'static str>>)>,
    verdicts: Vec<(&'static str, &'static str)>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn answer(mut self, needle: &'static str, replies: &[&'static str]) -> Self {
        self.answers
            .push((needle, Mutex::new(replies.iter().copied().collect())));
        self
    }

    fn verdict(mut self, needle: &'static str, reply: &'static str) -> Self {
        self.verdicts.push((needle, reply));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.user_prompt();

        let reply = if prompt.contains("You are the verifier") {
            self.verdicts
                .iter()
                .find(|(needle, _)| prompt.contains(needle))
                .map(|(_, reply)| *reply)
        } else {
            self.answers
                .iter()
                .find(|(needle, _)| prompt.contains(needle))
                .and_then(|(_, queue)| {
                    let mut queue = queue.lock().unwrap();
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().copied()
                    }
                })
        };

        Ok(CompletionResponse::text(
            reply.unwrap_or("I am not sure."),
            "scripted-model",
        ))
    }
}

/// Cancels the run once `after` questions have been recorded in total
struct CancelAfter {
    after: usize,
    token: CancellationToken,
}

impl ProgressReporter for CancelAfter {
    fn on_question_start(&self, _id: &QuestionId, _position: usize, _total: usize) {}

    fn on_recorded(&self, _record: &ProcessedRecord, metadata: &RunMetadata) {
        if metadata.questions_processed >= self.after {
            self.token.cancel();
        }
    }

    fn on_skipped(&self, _id: Option<&QuestionId>, _kind: FailureKind, _metadata: &RunMetadata) {}
    fn on_finished(&self, _summary: &RunSummary) {}
}

fn question(id: i64, text: &str, correct: Choice) -> Question {
    Question::new(id, text, AnswerOptions::new("w", "x", "y", "z"), correct)
}

fn engine_config(path: &Path, max_retries: u32) -> EngineConfig {
    EngineConfig {
        policy: RetryPolicy::immediate(max_retries),
        request: RequestSettings::default(),
        question_delay: Duration::ZERO,
        ..EngineConfig::new(path)
    }
}

fn read_document(path: &Path) -> ResultsDocument {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {:?}: {}", path, e));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse {:?}: {}", path, e))
}

fn recorded_ids(doc: &ResultsDocument) -> Vec<QuestionId> {
    doc.processed_questions
        .iter()
        .map(|r| r.question_id.clone())
        .collect()
}

fn assert_consistent(doc: &ResultsDocument) {
    let meta = &doc.metadata;
    assert_eq!(meta.questions_processed, doc.processed_questions.len());
    let correct = doc.processed_questions.iter().filter(|r| r.is_correct).count();
    assert_eq!(meta.correct_answers, correct);
    let expected = if meta.questions_processed == 0 {
        0.0
    } else {
        meta.correct_answers as f64 / meta.questions_processed as f64 * 100.0
    };
    assert!((meta.accuracy - expected).abs() < 1e-9);

    let mut ids = recorded_ids(doc);
    let before = ids.len();
    ids.sort_by_key(|id| id.to_string());
    ids.dedup();
    assert_eq!(ids.len(), before, "duplicate question ids recorded");
}

#[tokio::test]
async fn test_three_question_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let bank = QuestionBank::from_questions(vec![
        question(1, "first question", Choice::A),
        question(2, "second question", Choice::B),
        question(3, "third question", Choice::C),
    ]);
    let provider = Arc::new(
        ScriptedProvider::default()
            .answer("first question", &["Reasoning.\nANSWER: A"])
            .answer("second question", &["ANSWER: X", "ANSWER: B"])
            .answer("third question", &["I refuse to choose."]),
    );

    let engine = EvaluationEngine::new(provider.clone(), engine_config(&path, 2));
    let summary = engine.run(&bank, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.recorded, 2);
    assert_eq!(summary.skipped, 1);
    assert!(!summary.cancelled);
    // 1 for id1, 2 for id2, 3 (max_retries + 1) for id3
    assert_eq!(provider.calls(), 6);

    let doc = read_document(&path);
    assert_eq!(doc.metadata.total_questions, 3);
    assert_eq!(doc.metadata.questions_processed, 2);
    assert_eq!(doc.metadata.correct_answers, 2);
    assert_eq!(doc.metadata.accuracy, 100.0);
    assert_eq!(doc.metadata.model, "scripted-model");
    assert_eq!(recorded_ids(&doc), vec![QuestionId::from(1), QuestionId::from(2)]);
    assert_consistent(&doc);
}

#[tokio::test]
async fn test_exhaustion_leaves_results_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let bank = QuestionBank::from_questions(vec![
        question(1, "easy one", Choice::D),
        question(2, "hard one", Choice::A),
    ]);
    let script = || {
        Arc::new(
            ScriptedProvider::default()
                .answer("easy one", &["ANSWER: D"])
                .answer("hard one", &["no marker at all"]),
        )
    };

    let first = EvaluationEngine::new(script(), engine_config(&path, 3));
    first.run(&bank, CancellationToken::new()).await.unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let provider = script();
    let second = EvaluationEngine::new(provider.clone(), engine_config(&path, 3));
    let summary = second.run(&bank, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.already_processed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(provider.calls(), 4);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}

#[tokio::test]
async fn test_interrupted_then_resumed_matches_single_run() {
    let dir = tempfile::tempdir().unwrap();
    let straight_path = dir.path().join("straight.json");
    let resumed_path = dir.path().join("resumed.json");

    let bank = QuestionBank::from_questions(vec![
        question(1, "alpha", Choice::A),
        question(2, "bravo", Choice::B),
        question(3, "charlie", Choice::C),
        question(4, "delta", Choice::D),
        question(5, "echo", Choice::A),
    ]);
    let script = || {
        Arc::new(
            ScriptedProvider::default()
                .answer("alpha", &["ANSWER: A"])
                .answer("bravo", &["ANSWER: C"])
                .answer("charlie", &["ANSWER: C"])
                .answer("delta", &["ANSWER: B"])
                .answer("echo", &["ANSWER: A"]),
        )
    };

    EvaluationEngine::new(script(), engine_config(&straight_path, 1))
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();

    let token = CancellationToken::new();
    let interrupted = EvaluationEngine::new(script(), engine_config(&resumed_path, 1))
        .with_progress(Arc::new(CancelAfter {
            after: 2,
            token: token.clone(),
        }))
        .run(&bank, token)
        .await
        .unwrap();
    assert!(interrupted.cancelled);
    assert_eq!(read_document(&resumed_path).metadata.questions_processed, 2);

    let provider = script();
    let resumed = EvaluationEngine::new(provider.clone(), engine_config(&resumed_path, 1))
        .with_progress(Arc::new(NoOpProgress))
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.already_processed, 2);
    assert_eq!(resumed.recorded, 3);
    assert_eq!(provider.calls(), 3);

    let straight = read_document(&straight_path);
    let resumed = read_document(&resumed_path);
    assert_eq!(resumed.metadata.total_questions, straight.metadata.total_questions);
    assert_eq!(resumed.metadata.questions_processed, straight.metadata.questions_processed);
    assert_eq!(resumed.metadata.correct_answers, straight.metadata.correct_answers);
    assert_eq!(resumed.metadata.accuracy, straight.metadata.accuracy);
    assert_eq!(recorded_ids(&resumed), recorded_ids(&straight));

    let outcomes = |doc: &ResultsDocument| {
        doc.processed_questions
            .iter()
            .map(|r| (r.answer, r.correct_answer, r.is_correct))
            .collect::<Vec<_>>()
    };
    assert_eq!(outcomes(&resumed), outcomes(&straight));
    assert_consistent(&resumed);
}

#[tokio::test]
async fn test_verifier_override_accounting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verified.json");

    let bank = QuestionBank::from_questions(vec![
        question(1, "override me", Choice::C),
        question(2, "confirm me", Choice::B),
    ]);
    let provider = Arc::new(
        ScriptedProvider::default()
            .answer("override me", &["Hmm.\nANSWER: A"])
            .verdict("override me", "The original missed a step.\nCHANGED: C")
            .answer("confirm me", &["ANSWER: A"])
            .verdict("confirm me", "Looks right.\nVERIFIED: A"),
    );

    let config = engine_config(&path, 1).with_verify(true);
    let summary = EvaluationEngine::new(provider.clone(), config)
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.recorded, 2);
    assert_eq!(provider.calls(), 4);

    let doc = read_document(&path);
    assert_eq!(doc.metadata.answers_changed_by_verifier, Some(1));
    assert_eq!(doc.metadata.correct_answers, 1);
    assert_eq!(doc.metadata.accuracy, 50.0);

    let changed = &doc.processed_questions[0];
    assert_eq!(
        changed.answer,
        RecordedAnswer::Verified {
            original_answer: Choice::A,
            verified_answer: Choice::C,
            was_changed: true,
        }
    );
    assert!(changed.is_correct);

    let confirmed = &doc.processed_questions[1];
    assert!(!confirmed.was_changed());
    assert!(!confirmed.is_correct);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["processed_questions"][0]["verified_answer"], "C");
    assert_eq!(raw["processed_questions"][0]["original_answer"], "A");
    assert_eq!(raw["processed_questions"][0]["was_changed"], true);
    assert_eq!(raw["metadata"]["answers_changed_by_verifier"], 1);
}

#[tokio::test]
async fn test_verifier_exhaustion_discards_original_answer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verified.json");

    let bank = QuestionBank::from_questions(vec![question(1, "stubborn", Choice::A)]);
    let provider = Arc::new(
        ScriptedProvider::default()
            .answer("stubborn", &["ANSWER: A"])
            .verdict("stubborn", "ANSWER: A"),
    );

    let summary = EvaluationEngine::new(provider.clone(), engine_config(&path, 2).with_verify(true))
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.recorded, 0);
    assert_eq!(summary.skipped, 1);
    // one answer call, then max_retries + 1 verification calls
    assert_eq!(provider.calls(), 4);

    let doc = read_document(&path);
    assert!(doc.processed_questions.is_empty());
    assert_eq!(doc.metadata.total_questions, 1);
    assert_eq!(doc.metadata.answers_changed_by_verifier, Some(0));
}

#[tokio::test]
async fn test_fixture_bank_with_malformed_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let bank = load_question_bank(PathBuf::from(FIXTURES_DIR).join("questions.json")).unwrap();
    assert_eq!(bank.len(), 4);
    assert_eq!(bank.malformed_count(), 1);

    let provider = Arc::new(
        ScriptedProvider::default()
            .answer("closest to the Sun", &["ANSWER: A"])
            .answer("symbol for sodium", &["ANSWER: b"])
            .answer("hexagon", &["ANSWER: D"]),
    );

    let summary = EvaluationEngine::new(provider, engine_config(&path, 0))
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.recorded, 3);

    let doc = read_document(&path);
    assert_eq!(doc.metadata.total_questions, 4);
    assert_eq!(doc.metadata.correct_answers, 2);
    assert!((doc.metadata.accuracy - 200.0 / 3.0).abs() < 1e-9);
    assert_consistent(&doc);
}

#[tokio::test]
async fn test_resumes_file_written_by_earlier_tooling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model_accuracy_results.json");
    std::fs::write(
        &path,
        r#"{
  "metadata": {
    "model": "scripted-model",
    "start_time": "2025-01-30T10:00:00.000001",
    "last_updated": "2025-01-30T10:01:00.000001",
    "total_questions": 2,
    "questions_processed": 1,
    "correct_answers": 0,
    "accuracy": 0.0
  },
  "processed_questions": [
    {"id": 1, "model_answer": "B", "correct_answer": "A", "is_correct": false,
     "timestamp": "2025-01-30T10:00:30.5"}
  ]
}"#,
    )
    .unwrap();

    let bank = QuestionBank::from_questions(vec![
        question(1, "already done", Choice::A),
        question(2, "still pending", Choice::B),
    ]);
    let provider = Arc::new(
        ScriptedProvider::default()
            .answer("already done", &["ANSWER: A"])
            .answer("still pending", &["ANSWER: B"]),
    );

    let summary = EvaluationEngine::new(provider.clone(), engine_config(&path, 0))
        .run(&bank, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.already_processed, 1);
    assert_eq!(provider.calls(), 1);

    let doc = read_document(&path);
    assert_eq!(doc.metadata.questions_processed, 2);
    assert_eq!(doc.metadata.correct_answers, 1);
    assert_eq!(doc.metadata.accuracy, 50.0);
    assert!(!doc.processed_questions[0].is_correct);
    assert_consistent(&doc);
}
