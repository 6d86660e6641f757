//! Google Gemini `generateContent` client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{api_key_from_env, Endpoint, Timed};
use super::traits::{
    CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult, Role,
};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-thinking-exp-01-21";

pub struct GeminiClient {
    endpoint: Endpoint,
    default_model: String,
    top_p: Option<f32>,
    top_k: Option<u32>,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            endpoint: Endpoint::new(api_key, DEFAULT_BASE_URL, 10, 4_000_000),
            default_model: DEFAULT_MODEL.to_string(),
            top_p: None,
            top_k: None,
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

    /// Nucleus and top-k sampling parameters
    pub fn with_sampling(mut self, top_p: Option<f32>, top_k: Option<u32>) -> Self {
        self.top_p = top_p;
        self.top_k = top_k;
        self
    }

    fn body<'a>(&self, request: &'a CompletionRequest) -> GenerateBody<'a> {
        let contents = request
            .dialogue()
            .map(|m| Content {
                role: Some(match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                }),
                parts: vec![Part { text: &m.content }],
            })
            .collect();

        GenerateBody {
            contents,
            system_instruction: request.system_text().map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: Sampling {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                response_mime_type: "text/plain",
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: Sampling,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sampling {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GenerateReply {
    /// Text of the first candidate and its finish reason
    fn first_candidate(self) -> ProviderResult<(String, Option<String>)> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("No candidates in response".to_string()))?;

        let text = candidate
            .content
            .into_iter()
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        Ok((text, candidate.finish_reason))
    }
}

#[async_trait]
impl LLMProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let key = self.endpoint.api_key.as_str();

        let reply: Timed<GenerateReply> = self
            .endpoint
            .post_json(
                self.name(),
                &format!("models/{}:generateContent", model),
                |req| req.header("x-goog-api-key", key),
                &self.body(request),
            )
            .await?;

        let latency_ms = reply.latency_ms;
        let mut reply = reply.body;
        let usage = reply.usage_metadata.take().unwrap_or_default();
        self.endpoint
            .record_usage(usage.prompt_token_count, usage.candidates_token_count)
            .await;

        let model = reply.model_version.take().unwrap_or_else(|| model.to_string());
        let (content, finish_reason) = reply.first_candidate()?;

        Ok(CompletionResponse {
            content,
            model,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason: finish_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> Option<&RateLimiter> {
        Some(&self.endpoint.limiter)
    }
}
