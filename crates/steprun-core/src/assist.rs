//! Optional assistant capability
//!
//! An assistant suggests study questions about submitted code and proposes
//! corrections. It never fails the pipeline: problems come back as text.

use crate::protocol::AutocorrectResponse;
use async_trait::async_trait;

/// Question and correction provider
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Whether responses should carry questions at all
    fn is_enabled(&self) -> bool {
        true
    }

    /// Five or so questions about `code`, one per entry
    async fn generate_questions(&self, code: &str) -> Vec<String>;

    async fn autocorrect(&self, code: &str) -> AutocorrectResponse;
}

/// Used when no assistant is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssistant;

#[async_trait]
impl Assistant for NoAssistant {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn generate_questions(&self, _code: &str) -> Vec<String> {
        Vec::new()
    }

    async fn autocorrect(&self, _code: &str) -> AutocorrectResponse {
        AutocorrectResponse::failed("Assistant not configured")
    }
}

/// Split a model reply into one question per non-blank line
#[must_use]
pub fn split_questions(reply: &str) -> Vec<String> {
    reply
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_assistant_is_inert() {
        let assistant = NoAssistant;
        assert!(!assistant.is_enabled());
        assert!(assistant.generate_questions("x = 1").await.is_empty());
        assert_eq!(
            assistant.autocorrect("x = ").await.error.as_deref(),
            Some("Assistant not configured")
        );
    }

    #[test]
    fn questions_split_on_lines() {
        let reply = "\n1. What does x hold?\n\n  2. Why use a loop?  \n";
        assert_eq!(
            split_questions(reply),
            ["1. What does x hold?", "2. Why use a loop?"]
        );
    }
}
