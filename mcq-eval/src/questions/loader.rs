//! Question bank loading from JSON files

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use super::{AnswerOptions, BankEntry, Choice, Question, QuestionBank, QuestionId};

/// Error type for question bank loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

/// Wire shape of a single question entry
#[derive(Debug, Deserialize)]
struct QuestionRecord {
    id: QuestionId,
    question: String,
    options: AnswerOptions,
    correct_answer: String,
}

/// Load a question bank from a JSON file of the form `{"questions": [...]}`.
///
/// Entries are validated one by one; an invalid entry is kept as
/// [`BankEntry::Malformed`] so the run can skip it instead of aborting.
pub fn load_question_bank(path: impl AsRef<Path>) -> Result<QuestionBank, LoadError> {
    let content = std::fs::read_to_string(path)?;
    load_question_bank_from_str(&content)
}

/// Load a question bank from a JSON string
pub fn load_question_bank_from_str(content: &str) -> Result<QuestionBank, LoadError> {
    let doc: Value = serde_json::from_str(content)
        .map_err(|e| LoadError::Parse(format!("JSON parse error: {}", e)))?;

    let items = doc
        .get("questions")
        .ok_or_else(|| LoadError::MissingField("questions".to_string()))?
        .as_array()
        .ok_or_else(|| LoadError::Parse("\"questions\" must be an array".to_string()))?;

    let entries = items
        .iter()
        .enumerate()
        .map(|(index, item)| match parse_question(item) {
            Ok(q) => BankEntry::Valid(q),
            Err(reason) => BankEntry::Malformed {
                index,
                id: item
                    .get("id")
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
                reason,
            },
        })
        .collect();

    Ok(QuestionBank::new(entries))
}

fn parse_question(value: &Value) -> Result<Question, String> {
    let record: QuestionRecord =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    let correct_answer: Choice = record.correct_answer.parse()?;

    Ok(Question {
        id: record.id,
        text: record.question,
        options: record.options,
        correct_answer,
    })
}
