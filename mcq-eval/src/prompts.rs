//! Prompt templates for answering and verification

use std::fmt::Write;

use crate::questions::{Choice, Question};

fn write_question_block(out: &mut String, question: &Question) {
    let _ = writeln!(out, "Question: {}", question.text);
    out.push_str("\nOptions:\n");
    for (choice, text) in question.options.iter() {
        let _ = writeln!(out, "{}: {}", choice, text);
    }
}

/// Prompt asking the model to reason and end with `ANSWER: X`
pub fn answer_prompt(question: &Question) -> String {
    let mut prompt = String::from(
        "Please solve this multiple choice question. Provide your complete reasoning and then \
         state your final answer. You must end your response with your final answer in the \
         format 'ANSWER: X' where X is A, B, C, or D.\n\n",
    );
    write_question_block(&mut prompt, question);
    prompt.push_str("\nPlease provide your answer in the format 'ANSWER: X' where X is A, B, C, or D.");
    prompt
}

/// Prompt asking a verifier to confirm or override an extracted answer
pub fn verification_prompt(question: &Question, original_response: &str, original_answer: Choice) -> String {
    let mut prompt = String::from(
        "Please verify this answer to a multiple choice question. You are the verifier.\n\n",
    );
    write_question_block(&mut prompt, question);
    let _ = write!(
        prompt,
        "\nOriginal response:\n{}\n\nOriginal answer extracted: {}\n\n",
        original_response, original_answer
    );
    prompt.push_str(
        "As a verifier, please:\n\
         1. Review the reasoning\n\
         2. Check if the answer is correct\n\
         3. If you disagree, provide your reasoning\n\
         4. Provide your final answer\n\n\
         If you agree with the original answer, start with \"VERIFIED: \" followed by the answer.\n\
         If you disagree, start with \"CHANGED: \" followed by your answer.\n\n\
         End your response with either:\n\
         VERIFIED: X\n\
         or\n\
         CHANGED: X\n\
         where X is A, B, C, or D.",
    );
    prompt
}
