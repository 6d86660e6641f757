//! Second-pass verification of an extracted answer

use super::extract::{extract_verdict, Verdict};
use super::retry::{Answered, CallError, RetryingCaller};
use crate::prompts::verification_prompt;
use crate::questions::{Choice, Question};

/// Ask the verifier to confirm or override `original_answer`.
///
/// Uses the same retry discipline as answering, with extraction restricted to
/// the `VERIFIED:`/`CHANGED:` markers. The returned verdict's letter is the
/// one to score.
pub async fn verify_answer(
    caller: &RetryingCaller<'_>,
    question: &Question,
    original_response: &str,
    original_answer: Choice,
) -> Result<Answered<Verdict>, CallError> {
    tracing::info!("Verifying answer {} for question {}", original_answer, question.id);

    let prompt = verification_prompt(question, original_response, original_answer);
    caller
        .call_with(&prompt, "VERIFIED/CHANGED", extract_verdict)
        .await
}
