//! Request plumbing shared by the HTTP clients
//!
//! Every supported API reports failures as `{"error": {"message": ..}}` with
//! an optional `type`, so status handling lives here instead of per client.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Instant;

use super::traits::{ProviderError, ProviderResult};
use crate::runner::rate_limiter::RateLimiter;

/// Credentials, base URL, connection pool and rate budget of one API host
pub(crate) struct Endpoint {
    pub api_key: String,
    pub base_url: String,
    pub limiter: RateLimiter,
    http: Client,
}

/// A parsed response body and the time the round trip took
pub(crate) struct Timed<T> {
    pub body: T,
    pub latency_ms: u64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Read the API key from `var`
pub(crate) fn api_key_from_env(var: &str) -> ProviderResult<String> {
    std::env::var(var).map_err(|_| ProviderError::Config(format!("{} not set", var)))
}

impl Endpoint {
    pub fn new(api_key: String, base_url: &str, rpm: u32, tpm: u32) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(rpm, tpm),
            http: Client::new(),
        }
    }

    pub fn set_rate_limits(&mut self, rpm: u32, tpm: u32) {
        self.limiter = RateLimiter::new(rpm, tpm);
    }

    pub fn set_base_url(&mut self, url: &str) {
        self.base_url = url.trim_end_matches('/').to_string();
    }

    /// Wait for the rate limiter, POST `body` to `{base_url}/{path}` and parse
    /// the JSON reply. `auth` attaches the host's credential headers.
    pub async fn post_json<B, R>(
        &self,
        host: &str,
        path: &str,
        auth: impl FnOnce(RequestBuilder) -> RequestBuilder,
        body: &B,
    ) -> ProviderResult<Timed<R>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.limiter.acquire().await;

        let start = Instant::now();
        let request = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(body);
        let response = auth(request).send().await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = check_status(host, response).await?;
        let body = response.json::<R>().await?;

        Ok(Timed { body, latency_ms })
    }

    /// Count tokens reported by the host against the per-minute budget
    pub async fn record_usage(&self, input_tokens: u32, output_tokens: u32) {
        self.limiter.record_tokens(input_tokens + output_tokens).await;
    }
}

async fn check_status(host: &str, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = parse_retry_after(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
    );
    let raw = response.text().await.unwrap_or_default();

    Err(classify(host, status, retry_after_ms, &raw))
}

/// Delay-seconds form of `retry-after` in milliseconds; absent or unparsable is 0
fn parse_retry_after(header: Option<&str>) -> u64 {
    header
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(0, |secs| secs.saturating_mul(1000))
}

/// Map a failed status and its body to a provider error
fn classify(host: &str, status: StatusCode, retry_after_ms: u64, raw: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorEnvelope>(raw).ok().map(|e| e.error);
    let kind = detail.as_ref().and_then(|d| d.kind.as_deref()).unwrap_or("");
    let message = match &detail {
        Some(d) if !d.message.is_empty() => d.message.clone(),
        _ => format!("HTTP {}: {}", status.as_u16(), raw),
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS if kind == "insufficient_quota" => {
            ProviderError::Config(format!("{} quota exceeded: {}", host, message))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            tracing::debug!("{} rate limited: {}", host, message);
            ProviderError::RateLimited { retry_after_ms }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Config(format!(
            "{} auth error ({}): {}",
            host,
            status.as_u16(),
            message
        )),
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
