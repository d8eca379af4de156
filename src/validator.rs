//! Query validation
//!
//! Pre-flight checks on incoming questions, run before any expensive work.
//! Rejections carry a user-facing message and are not service attempts:
//! the pipeline records no metrics for them.

/// Minimum accepted question length in characters. Anything shorter is in
/// practice caught by the whitespace check first.
pub const MIN_QUESTION_CHARS: usize = 1;

/// Purely a predicate plus message; no side effects.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_chars: usize,
}

impl QueryValidator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Ok for acceptable input, Err with a user-facing message otherwise.
    pub fn validate(&self, message: &str) -> Result<(), String> {
        if message.trim().is_empty() {
            return Err("Please enter a question.".to_string());
        }

        let chars = message.chars().count();
        if chars < MIN_QUESTION_CHARS {
            return Err("Please enter a question.".to_string());
        }
        if chars > self.max_chars {
            return Err(format!(
                "Question is too long ({} characters). Please keep it under {} characters.",
                chars, self.max_chars
            ));
        }

        Ok(())
    }
}
