//! Answer extraction from free-form model output
//!
//! A marker (`ANSWER:`, `VERIFIED:`, `CHANGED:`) is matched case-insensitively,
//! followed by optional whitespace and one of `A`-`D`. The first match in the
//! text wins. A model that restates a tentative letter before its final one
//! will have the earlier letter extracted; this is kept as-is.

use regex::Regex;
use std::sync::LazyLock;

use crate::questions::Choice;

static ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ANSWER:\s*([A-D])").expect("valid regex"));
static VERIFIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)VERIFIED:\s*([A-D])").expect("valid regex"));
static CHANGED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CHANGED:\s*([A-D])").expect("valid regex"));
static ANY_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(ANSWER|VERIFIED|CHANGED):").expect("valid regex"));

/// Textual tag that precedes the model's chosen letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Answer,
    Verified,
    Changed,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Answer => "ANSWER",
            Marker::Verified => "VERIFIED",
            Marker::Changed => "CHANGED",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Marker::Answer => &*ANSWER_RE,
            Marker::Verified => &*VERIFIED_RE,
            Marker::Changed => &*CHANGED_RE,
        }
    }
}

/// Extract the letter following the first occurrence of `marker`.
///
/// Returns `None` when no marker is followed by a valid letter; an invalid
/// letter such as `ANSWER: Q` is rejected rather than coerced.
pub fn extract(text: &str, marker: Marker) -> Option<Choice> {
    marker
        .regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().chars().next())
        .and_then(Choice::from_char)
}

/// Whether `text` contains one of the markers named in `label` (e.g.
/// `"ANSWER"` or `"VERIFIED/CHANGED"`), regardless of what follows it.
///
/// After a failed [`extract`] this tells a missing marker apart from a
/// marker followed by something other than a valid letter.
pub fn mentions_marker(text: &str, label: &str) -> bool {
    ANY_MARKER_RE.captures_iter(text).any(|caps| {
        let found = caps[1].to_ascii_uppercase();
        label.split('/').any(|name| name == found)
    })
}

/// Verifier decision extracted from a verification response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Confirmed(Choice),
    Changed(Choice),
}

impl Verdict {
    pub fn choice(&self) -> Choice {
        match self {
            Verdict::Confirmed(c) | Verdict::Changed(c) => *c,
        }
    }

    pub fn was_changed(&self) -> bool {
        matches!(self, Verdict::Changed(_))
    }
}

/// Scan a verifier response for `CHANGED:` and `VERIFIED:` independently.
///
/// When both markers are present `CHANGED:` takes precedence.
pub fn extract_verdict(text: &str) -> Option<Verdict> {
    if let Some(choice) = extract(text, Marker::Changed) {
        return Some(Verdict::Changed(choice));
    }
    extract(text, Marker::Verified).map(Verdict::Confirmed)
}
