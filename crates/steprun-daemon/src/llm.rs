//! Chat-completions assistant
//!
//! Speaks the OpenAI-compatible `/chat/completions` API. Every failure is
//! folded into the returned text; nothing here fails a request.

use crate::config::AssistantConfig;
use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use steprun_core::assist::{Assistant, split_questions};
use steprun_core::protocol::AutocorrectResponse;

const CORRECTION_SYSTEM_PROMPT: &str = "You are a code correction tool. Respond ONLY with the corrected code. Do not include any explanations, introductory text, markdown formatting, or HTML.";

const EXPLANATION_SYSTEM_PROMPT: &str =
    "You are a code explanation tool. Provide a brief explanation of what you fixed in the code.";

const FALLBACK_EXPLANATION: &str = "Code has been corrected.";

/// A failed completion call, rendered the way clients see it
#[derive(Debug, thiserror::Error)]
enum ChatError {
    #[error("Error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("response contained no choices")]
    Empty,
}

/// Assistant backed by a chat-completions endpoint
#[derive(Debug, Clone)]
pub struct ChatAssistant {
    client: Client,
    config: AssistantConfig,
}

impl ChatAssistant {
    pub fn new(config: AssistantConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, messages: Vec<ChatMessage<'_>>) -> Result<String, ChatError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
        };

        let mut builder = self
            .client
            .post(self.completions_url())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {api_key}"));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "assistant request rejected");
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or(ChatError::Empty)
    }
}

#[async_trait]
impl Assistant for ChatAssistant {
    async fn generate_questions(&self, code: &str) -> Vec<String> {
        let prompt = format!(
            "Analyze the following code and generate 5 conceptual or practical questions:\n\n{code}"
        );
        match self.complete(vec![ChatMessage::user(&prompt)]).await {
            Ok(reply) => split_questions(&reply),
            Err(e @ ChatError::Status { .. }) => vec![e.to_string()],
            Err(e) => {
                tracing::warn!(error = %e, "question generation failed");
                vec![format!("Error generating questions: {e}")]
            }
        }
    }

    async fn autocorrect(&self, code: &str) -> AutocorrectResponse {
        let prompt = format!("Correct the following code snippet:\n\n{code}");
        let corrected = match self
            .complete(vec![
                ChatMessage::system(CORRECTION_SYSTEM_PROMPT),
                ChatMessage::user(&prompt),
            ])
            .await
        {
            Ok(corrected) => corrected,
            Err(e) => {
                tracing::warn!(error = %e, "autocorrect failed");
                let message = match &e {
                    ChatError::Status { .. } => e.to_string(),
                    ChatError::Transport(_) | ChatError::Empty => format!("Error: {e}"),
                };
                return AutocorrectResponse::failed(message);
            }
        };

        let prompt = format!(
            "Original code:\n\n{code}\n\nCorrected code:\n\n{corrected}\n\nExplain what was fixed, focusing only on the corrections made."
        );
        let explanation = self
            .complete(vec![
                ChatMessage::system(EXPLANATION_SYSTEM_PROMPT),
                ChatMessage::user(&prompt),
            ])
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "explanation unavailable");
                FALLBACK_EXPLANATION.to_string()
            });

        AutocorrectResponse {
            corrected_code: Some(corrected),
            explanation: Some(explanation),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ChatMessage<'a> {
    const fn system(content: &'a str) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    const fn user(content: &'a str) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    fn assistant(server: &MockServer) -> ChatAssistant {
        ChatAssistant::new(AssistantConfig {
            base_url: server.uri(),
            model: "test-model".into(),
            api_key: Some("test-key".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn questions_are_split_per_line() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .and(body_string_contains("generate 5 conceptual or practical questions"))
            .respond_with(reply("1. What is x?\n\n2. Why print?\n"))
            .expect(1)
            .mount(&server)
            .await;

        let questions = assistant(&server).generate_questions("x = 1\nprint(x)").await;
        assert_eq!(questions, ["1. What is x?", "2. Why print?"]);
    }

    #[tokio::test]
    async fn http_errors_become_a_question_line() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let questions = assistant(&server).generate_questions("x = 1").await;
        assert_eq!(questions, ["Error: 401 - bad key"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let assistant = ChatAssistant::new(AssistantConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..AssistantConfig::default()
        })
        .unwrap();

        let questions = assistant.generate_questions("x = 1").await;
        assert_eq!(questions.len(), 1);
        assert!(questions[0].starts_with("Error generating questions: "));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_autocorrect() {
        let assistant = ChatAssistant::new(AssistantConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..AssistantConfig::default()
        })
        .unwrap();

        let response = assistant.autocorrect("x = ").await;
        assert!(response.corrected_code.is_none());
        let error = response.error.unwrap();
        assert!(error.starts_with("Error: "), "{error:?}");
        assert!(!error.starts_with("Error: Error"), "{error:?}");
    }

    #[tokio::test]
    async fn empty_choices_fail_autocorrect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let response = assistant(&server).autocorrect("x = ").await;
        assert_eq!(
            response,
            AutocorrectResponse::failed("Error: response contained no choices")
        );
    }

    #[tokio::test]
    async fn autocorrect_returns_code_and_explanation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("You are a code correction tool"))
            .respond_with(reply("print('hi')\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("You are a code explanation tool"))
            .respond_with(reply("Closed the string."))
            .expect(1)
            .mount(&server)
            .await;

        let response = assistant(&server).autocorrect("print('hi)").await;
        assert_eq!(
            response,
            AutocorrectResponse {
                corrected_code: Some("print('hi')".into()),
                explanation: Some("Closed the string.".into()),
                error: None,
            }
        );
    }

    #[tokio::test]
    async fn failed_explanation_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("You are a code correction tool"))
            .respond_with(reply("x = 1"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("You are a code explanation tool"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let response = assistant(&server).autocorrect("x = ").await;
        assert_eq!(response.corrected_code.as_deref(), Some("x = 1"));
        assert_eq!(response.explanation.as_deref(), Some(FALLBACK_EXPLANATION));
    }

    #[tokio::test]
    async fn failed_correction_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let response = assistant(&server).autocorrect("x = ").await;
        assert_eq!(response, AutocorrectResponse::failed("Error: 429 - slow down"));
    }
}
