//! Anthropic Messages API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{api_key_from_env, Endpoint, Timed};
use super::traits::{CompletionRequest, CompletionResponse, LLMProvider, ProviderResult};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    endpoint: Endpoint,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            endpoint: Endpoint::new(api_key, DEFAULT_BASE_URL, 60, 100_000),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_env(var: &str) -> ProviderResult<Self> {
        api_key_from_env(var).map(Self::new)
    }

    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.endpoint.set_base_url(url.as_ref());
        self
    }

    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.endpoint.set_rate_limits(rpm, tpm);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Turn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> MessagesBody<'a> {
    /// System text travels in its own field, never as a turn
    fn build(request: &'a CompletionRequest, model: &'a str) -> Self {
        Self {
            model,
            max_tokens: request.max_tokens,
            system: request.system_text(),
            messages: request
                .dialogue()
                .map(|m| Turn {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
        }
    }
}

#[derive(Deserialize)]
struct MessagesReply {
    model: String,
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: Usage,
}

/// Only `text` blocks carry answer text; `thinking` and others are skipped
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesReply {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                Block::Other => None,
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = MessagesBody::build(request, model);
        let key = self.endpoint.api_key.as_str();

        let reply: Timed<MessagesReply> = self
            .endpoint
            .post_json(
                self.name(),
                "messages",
                |req| req.header("x-api-key", key).header("anthropic-version", API_VERSION),
                &body,
            )
            .await?;

        let latency_ms = reply.latency_ms;
        let reply = reply.body;
        self.endpoint
            .record_usage(reply.usage.input_tokens, reply.usage.output_tokens)
            .await;

        Ok(CompletionResponse {
            content: reply.text(),
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
            finish_reason: reply.stop_reason.unwrap_or_else(|| "unknown".to_string()),
            model: reply.model,
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> Option<&RateLimiter> {
        Some(&self.endpoint.limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;

    #[test]
    fn test_text_blocks_are_joined() {
        let raw = r#"{
            "model": "claude",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4},
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Reasoning... "},
                {"type": "text", "text": "ANSWER: C"}
            ]
        }"#;
        let parsed: MessagesReply = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "Reasoning... ANSWER: C");
    }

    #[test]
    fn test_system_turn_moves_to_system_field() {
        let request = CompletionRequest::new(
            vec![Message::system("be terse"), Message::user("question")],
            64,
        );
        let json = serde_json::to_value(MessagesBody::build(&request, "claude")).unwrap();

        assert_eq!(json["system"], "be terse");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
    }
}
