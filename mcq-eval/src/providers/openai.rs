//! OpenAI-compatible chat completions client (OpenAI, Groq, local servers)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{api_key_from_env, Endpoint, Timed};
use super::traits::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Client for any host exposing the OpenAI chat completions API
pub struct OpenAIClient {
    name: String,
    endpoint: Endpoint,
    default_model: String,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            name: "openai".to_string(),
            endpoint: Endpoint::new(api_key, DEFAULT_BASE_URL, 500, 200_000),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_env(var: &str) -> ProviderResult<Self> {
        api_key_from_env(var).map(Self::new)
    }

    /// Name reported in logs and results, e.g. "groq"
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
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

/// o-series models reject `temperature`
fn is_reasoning_model(model: &str) -> bool {
    ["o1", "o3", "o4"].iter().any(|p| model.starts_with(p))
}

/// o-series and gpt-5 take `max_completion_tokens` instead of `max_tokens`
fn uses_completion_tokens(model: &str) -> bool {
    is_reasoning_model(model) || model.starts_with("gpt-5")
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatBody<'a> {
    fn build(request: &'a CompletionRequest, model: &'a str) -> Self {
        let system = request.system_prompt.as_deref().map(|content| ChatTurn {
            role: "system",
            content,
        });
        let turns = request.messages.iter().map(|m| ChatTurn {
            role: m.role.as_str(),
            content: &m.content,
        });

        let limit = Some(request.max_tokens);
        let completion_tokens = uses_completion_tokens(model);

        Self {
            model,
            messages: system.into_iter().chain(turns).collect(),
            max_tokens: limit.filter(|_| !completion_tokens),
            max_completion_tokens: limit.filter(|_| completion_tokens),
            temperature: request.temperature.filter(|_| !is_reasoning_model(model)),
        }
    }
}

#[derive(Deserialize)]
struct ChatReply {
    model: String,
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ReplyUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = ChatBody::build(request, model);
        let bearer = format!("Bearer {}", self.endpoint.api_key);

        let reply: Timed<ChatReply> = self
            .endpoint
            .post_json(
                &self.name,
                "chat/completions",
                |req| req.header("Authorization", bearer),
                &body,
            )
            .await?;

        let ChatReply { model, choices, usage } = reply.body;
        let usage = usage.unwrap_or_default();
        self.endpoint
            .record_usage(usage.prompt_tokens, usage.completion_tokens)
            .await;

        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms: reply.latency_ms,
        })
    }

    fn rate_limiter(&self) -> Option<&RateLimiter> {
        Some(&self.endpoint.limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_field_selection() {
        assert!(uses_completion_tokens("o3-mini"));
        assert!(uses_completion_tokens("gpt-5.2"));
        assert!(!uses_completion_tokens("deepseek-r1-distill-llama-70b"));
        assert!(is_reasoning_model("o1-preview"));
        assert!(!is_reasoning_model("gpt-5.2"));
    }

    #[test]
    fn test_body_for_chat_model() {
        let request = CompletionRequest::prompt("hi", 16)
            .with_temperature(Some(0.2))
            .with_system("be brief");
        let json = serde_json::to_value(ChatBody::build(&request, "llama-3.3-70b")).unwrap();

        assert_eq!(json["max_tokens"], 16);
        assert!(json.get("max_completion_tokens").is_none());
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_body_for_reasoning_model() {
        let request = CompletionRequest::prompt("hi", 16).with_temperature(Some(0.2));
        let json = serde_json::to_value(ChatBody::build(&request, "o3-mini")).unwrap();

        assert_eq!(json["max_completion_tokens"], 16);
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_reply_without_usage() {
        let raw = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"ANSWER: A"},"finish_reason":"stop"}]}"#;
        let parsed: ChatReply = serde_json::from_str(raw).unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ANSWER: A"));
    }
}
