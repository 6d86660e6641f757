//! Question bank types and loading

pub mod loader;

pub use loader::{load_question_bank, load_question_bank_from_str, LoadError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four answer letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    pub const ALL: [Choice; 4] = [Choice::A, Choice::B, Choice::C, Choice::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        }
    }

    /// Map a single character to a choice, ignoring case
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Choice::A),
            'B' => Some(Choice::B),
            'C' => Some(Choice::C),
            'D' => Some(Choice::D),
            _ => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact form only: one uppercase letter, no surrounding whitespace
impl FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Choice::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Invalid choice: {:?}", s))
    }
}

/// Stable question key. Banks use either integer or string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Number(i64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Number(n) => write!(f, "{}", n),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for QuestionId {
    fn from(n: i64) -> Self {
        QuestionId::Number(n)
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        QuestionId::Text(s.to_string())
    }
}

impl From<String> for QuestionId {
    fn from(s: String) -> Self {
        QuestionId::Text(s)
    }
}

/// The four option texts of a question. Any key besides A-D is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnswerOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

impl AnswerOptions {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        c: impl Into<String>,
        d: impl Into<String>,
    ) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            c: c.into(),
            d: d.into(),
        }
    }

    pub fn get(&self, choice: Choice) -> &str {
        match choice {
            Choice::A => &self.a,
            Choice::B => &self.b,
            Choice::C => &self.c,
            Choice::D => &self.d,
        }
    }

    /// Options in letter order
    pub fn iter(&self) -> impl Iterator<Item = (Choice, &str)> {
        Choice::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// A multiple-choice question, read-only once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: AnswerOptions,
    pub correct_answer: Choice,
}

impl Question {
    pub fn new(
        id: impl Into<QuestionId>,
        text: impl Into<String>,
        options: AnswerOptions,
        correct_answer: Choice,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            options,
            correct_answer,
        }
    }
}

/// A bank entry: either a usable question or a record that failed validation
#[derive(Debug, Clone)]
pub enum BankEntry {
    Valid(Question),
    Malformed {
        index: usize,
        id: Option<QuestionId>,
        reason: String,
    },
}

/// Ordered question bank. Order is the processing order.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    entries: Vec<BankEntry>,
}

impl QuestionBank {
    pub fn new(entries: Vec<BankEntry>) -> Self {
        Self { entries }
    }

    pub fn from_questions(questions: Vec<Question>) -> Self {
        Self {
            entries: questions.into_iter().map(BankEntry::Valid).collect(),
        }
    }

    pub fn entries(&self) -> &[BankEntry] {
        &self.entries
    }

    /// Number of entries, malformed ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.entries.iter().filter_map(|e| match e {
            BankEntry::Valid(q) => Some(q),
            BankEntry::Malformed { .. } => None,
        })
    }

    pub fn malformed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, BankEntry::Malformed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parsing() {
        assert_eq!("B".parse::<Choice>().unwrap(), Choice::B);
        assert!("b".parse::<Choice>().is_err());
        assert!(" D ".parse::<Choice>().is_err());
        assert!("E".parse::<Choice>().is_err());
        assert!("AB".parse::<Choice>().is_err());
        assert!("".parse::<Choice>().is_err());
    }

    #[test]
    fn test_extra_option_key_rejected() {
        let five = r#"{"A": "a", "B": "b", "C": "c", "D": "d", "E": "e"}"#;
        assert!(serde_json::from_str::<AnswerOptions>(five).is_err());
    }

    #[test]
    fn test_question_id_display_and_serde() {
        let n: QuestionId = serde_json::from_str("42").unwrap();
        let s: QuestionId = serde_json::from_str("\"rec-7\"").unwrap();
        assert_eq!(n, QuestionId::Number(42));
        assert_eq!(n.to_string(), "42");
        assert_eq!(s.to_string(), "rec-7");
        assert_ne!(QuestionId::from(1), QuestionId::from("1"));
    }

    #[test]
    fn test_options_iterate_in_letter_order() {
        let opts = AnswerOptions::new("w", "x", "y", "z");
        let letters: Vec<_> = opts.iter().map(|(c, t)| format!("{}{}", c, t)).collect();
        assert_eq!(letters, vec!["Aw", "Bx", "Cy", "Dz"]);
    }
}
