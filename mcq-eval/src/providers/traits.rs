//! The model-provider seam: request and response shapes plus the client trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::runner::rate_limiter::RateLimiter;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// What the harness asks of a provider
///
/// `model: None` means the provider's configured default.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: None,
            system_prompt: None,
            messages,
            max_tokens,
            temperature: None,
        }
    }

    /// Single-turn request carrying one user prompt
    pub fn prompt(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self::new(vec![Message::user(prompt)], max_tokens)
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..self
        }
    }

    pub fn with_temperature(self, temperature: Option<f32>) -> Self {
        Self { temperature, ..self }
    }

    pub fn with_system(self, system: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system.into()),
            ..self
        }
    }

    /// Turns that are not system text
    pub fn dialogue(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// The explicit system prompt, or else the first system turn
    pub fn system_text(&self) -> Option<&str> {
        self.system_prompt.as_deref().or_else(|| {
            self.messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
        })
    }

    /// Text of the last user turn
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }
}

/// One complete reply; streamed output is reassembled before it is returned
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

impl CompletionResponse {
    /// Reply carrying only text, for scripted providers
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: "stop".to_string(),
            latency_ms: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("no reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed reply: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Server-requested pause, if the error carries one
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A text-completion backend.
///
/// The harness sends one prompt at a time and only needs the full reply text.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Name used in logs and results (e.g. "groq", "gemini")
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Request and token budget, for clients that enforce one
    fn rate_limiter(&self) -> Option<&RateLimiter> {
        None
    }

    /// Send a tiny prompt to confirm credentials and reachability.
    ///
    /// Being rate limited still proves the endpoint accepted the key.
    async fn ping(&self) -> ProviderResult<()> {
        match self.complete(&CompletionRequest::prompt("Hi", 10)).await {
            Ok(_) | Err(ProviderError::RateLimited { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::system("x")).unwrap();
        assert_eq!(json["role"], "system");
        let back: Message = serde_json::from_str(r#"{"role":"assistant","content":"y"}"#).unwrap();
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn test_system_text_and_dialogue() {
        let request = CompletionRequest::new(
            vec![Message::system("rules"), Message::user("first"), Message::user("second")],
            8,
        );
        assert_eq!(request.system_text(), Some("rules"));
        assert_eq!(request.dialogue().count(), 2);
        assert_eq!(request.user_prompt(), "second");

        let request = request.with_system("override");
        assert_eq!(request.system_text(), Some("override"));
    }

    #[test]
    fn test_only_rate_limit_carries_retry_hint() {
        assert_eq!(
            ProviderError::RateLimited { retry_after_ms: 1500 }.retry_after_ms(),
            Some(1500)
        );
        assert_eq!(ProviderError::Parse("x".to_string()).retry_after_ms(), None);
    }
}
