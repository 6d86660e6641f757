//! Bounded retry around a provider call plus answer extraction

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::extract::{extract, mentions_marker, Marker};
use crate::config::ProviderConfig;
use crate::providers::{CompletionRequest, LLMProvider, ProviderError};
use crate::questions::Choice;

/// Retry limits and per-attempt settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first, so `max_retries + 1` in total
    pub max_retries: u32,
    /// Fixed pause after every failed attempt
    pub retry_delay: Duration,
    /// Upper bound on a single provider call
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_profile(profile: &ProviderConfig) -> Self {
        Self {
            max_retries: profile.max_retries,
            retry_delay: Duration::from_millis(profile.retry_delay_ms),
            timeout: Duration::from_millis(profile.timeout_ms),
        }
    }

    /// No delays, for scripted providers
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Request parameters applied to every prompt
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 8192,
            temperature: None,
        }
    }
}

impl RequestSettings {
    pub fn from_profile(profile: &ProviderConfig) -> Self {
        Self {
            model: Some(profile.default_model.clone()),
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
        }
    }
}

/// Why a single attempt failed
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("{}", describe_extraction(.marker, .malformed_letter))]
    Extraction {
        marker: &'static str,
        /// The marker was present but not followed by a letter A-D
        malformed_letter: bool,
    },
}

fn describe_extraction(marker: &str, malformed_letter: &bool) -> String {
    if *malformed_letter {
        format!("{}: marker without a valid letter", marker)
    } else {
        format!("no {}: marker in response", marker)
    }
}

/// Terminal outcome of a retried call that produced no answer
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("exhausted after {attempts} attempts, last failure: {last}")]
    Exhausted { attempts: u32, last: AttemptError },

    #[error("cancelled")]
    Cancelled,
}

/// A successfully extracted value with the text it came from
#[derive(Debug, Clone)]
pub struct Answered<T> {
    pub value: T,
    pub text: String,
    pub attempts: u32,
}

/// Calls a provider one request at a time until the response yields a valid
/// answer or the attempt budget runs out
pub struct RetryingCaller<'a> {
    provider: &'a dyn LLMProvider,
    policy: RetryPolicy,
    request: RequestSettings,
    cancel: CancellationToken,
}

impl<'a> RetryingCaller<'a> {
    pub fn new(provider: &'a dyn LLMProvider, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            request: RequestSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request(mut self, request: RequestSettings) -> Self {
        self.request = request;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Ask for an answer and extract it with the `ANSWER:` marker
    pub async fn call(&self, prompt: &str) -> Result<Answered<Choice>, CallError> {
        self.call_with(prompt, Marker::Answer.as_str(), |text| {
            extract(text, Marker::Answer)
        })
        .await
    }

    /// Retry loop shared by answering and verification.
    ///
    /// `parse` returning `None` counts as a failed attempt, the same as a
    /// provider error.
    pub async fn call_with<T, F>(
        &self,
        prompt: &str,
        marker: &'static str,
        parse: F,
    ) -> Result<Answered<T>, CallError>
    where
        F: Fn(&str) -> Option<T>,
    {
        let total = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::info!("Attempt {}/{} ({})", attempt, total, marker);

            let error = match self.send(prompt).await? {
                Ok(text) => {
                    tracing::debug!("Received {} chars from {}", text.len(), self.provider.name());
                    match parse(&text) {
                        Some(value) => {
                            return Ok(Answered {
                                value,
                                text,
                                attempts: attempt,
                            })
                        }
                        None => {
                            let error = AttemptError::Extraction {
                                marker,
                                malformed_letter: mentions_marker(&text, marker),
                            };
                            tracing::warn!("Attempt {}/{} rejected: {}", attempt, total, error);
                            error
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Provider error on {}: {}", self.provider.name(), e);
                    AttemptError::Provider(e)
                }
            };

            if attempt >= total {
                tracing::error!(
                    "Maximum attempts ({}) reached for {}, skipping",
                    total,
                    marker
                );
                return Err(CallError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            self.pause(&error).await?;
        }
    }

    /// One provider round trip. The outer `Result` only carries cancellation.
    async fn send(&self, prompt: &str) -> Result<Result<String, ProviderError>, CallError> {
        let mut request = CompletionRequest::prompt(prompt, self.request.max_tokens)
            .with_temperature(self.request.temperature);
        if let Some(model) = &self.request.model {
            request = request.with_model(model);
        }

        let call = tokio::time::timeout(self.policy.timeout, self.provider.complete(&request));

        tokio::select! {
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            outcome = call => Ok(match outcome {
                Ok(result) => result.map(|r| r.content),
                Err(_) => Err(ProviderError::Timeout {
                    timeout_ms: self.policy.timeout.as_millis() as u64,
                }),
            }),
        }
    }

    /// Fixed delay between attempts; a server-requested pause is honoured if longer
    async fn pause(&self, error: &AttemptError) -> Result<(), CallError> {
        let hinted = match error {
            AttemptError::Provider(e) => e.retry_after_ms().map(Duration::from_millis),
            AttemptError::Extraction { .. } => None,
        };
        let delay = hinted.map_or(self.policy.retry_delay, |h| h.max(self.policy.retry_delay));

        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<ProviderResult<String>>>,
        fallback: String,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<ProviderResult<String>>, fallback: &str) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: fallback.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, _request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
                .map(|text| CompletionResponse::text(text, "scripted-model"))
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let provider = Scripted::new(vec![], "Reasoning.\nANSWER: c");
        let caller = RetryingCaller::new(&provider, RetryPolicy::immediate(3));

        let answered = caller.call("q").await.unwrap();
        assert_eq!(answered.value, Choice::C);
        assert_eq!(answered.attempts, 1);
        assert!(answered.text.contains("Reasoning."));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_makes_max_retries_plus_one_calls() {
        let provider = Scripted::new(vec![], "I cannot decide.");
        let caller = RetryingCaller::new(&provider, RetryPolicy::immediate(3));

        match caller.call("q").await {
            Err(CallError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(
                    last,
                    AttemptError::Extraction {
                        marker: "ANSWER",
                        malformed_letter: false
                    }
                ));
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|a| a.value)),
        }
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_bad_letter_reported_separately_from_missing_marker() {
        let provider = Scripted::new(vec![], "ANSWER: E");
        let caller = RetryingCaller::new(&provider, RetryPolicy::immediate(0));

        match caller.call("q").await {
            Err(CallError::Exhausted { last, .. }) => {
                assert!(matches!(
                    last,
                    AttemptError::Extraction {
                        malformed_letter: true,
                        ..
                    }
                ));
                assert_eq!(last.to_string(), "ANSWER: marker without a valid letter");
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|a| a.value)),
        }
    }

    #[tokio::test]
    async fn test_provider_errors_are_retried() {
        let provider = Scripted::new(
            vec![
                Err(ProviderError::Api {
                    status: 500,
                    message: "boom".to_string(),
                }),
                Err(ProviderError::RateLimited { retry_after_ms: 0 }),
            ],
            "ANSWER: A",
        );
        let caller = RetryingCaller::new(&provider, RetryPolicy::immediate(2));

        let answered = caller.call("q").await.unwrap();
        assert_eq!(answered.value, Choice::A);
        assert_eq!(answered.attempts, 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let provider = Scripted::new(vec![Err(ProviderError::Parse("bad".to_string()))], "ANSWER: A");
        let caller = RetryingCaller::new(&provider, RetryPolicy::immediate(0));

        match caller.call("q").await {
            Err(CallError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(last, AttemptError::Provider(ProviderError::Parse(_))));
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|a| a.value)),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_delay() {
        let provider = Scripted::new(vec![], "nothing useful");
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay: Duration::from_secs(3600),
            timeout: Duration::from_secs(5),
        };
        let caller = RetryingCaller::new(&provider, policy).with_cancellation(cancel.clone());

        let handle = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let (result, _) = tokio::join!(caller.call("q"), handle);

        assert!(matches!(result, Err(CallError::Cancelled)));
        assert_eq!(provider.calls(), 1);
    }
}
