//! Sliding-window rate limiter for provider requests and tokens

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter tracking requests and tokens over a one-minute sliding window
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    last_requests: Mutex<VecDeque<Instant>>,
    token_usage: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    /// `requests_per_minute` is clamped to at least one
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute,
            last_requests: Mutex::new(VecDeque::new()),
            token_usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request may be sent, then record it.
    ///
    /// A token budget of zero disables the token check.
    pub async fn acquire(&self) {
        loop {
            if let Some(wait) = self.check_request_limit().await {
                tracing::debug!("Request window full, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if self.tokens_per_minute > 0
                && self.current_token_usage().await >= self.tokens_per_minute
            {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }

            self.last_requests.lock().await.push_back(Instant::now());
            return;
        }
    }

    /// Time until the oldest request leaves the window, if the window is full
    async fn check_request_limit(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut sent = self.last_requests.lock().await;
        prune(&mut *sent, now, |at| *at);

        if sent.len() < self.requests_per_minute as usize {
            return None;
        }
        sent.front().map(|oldest| {
            WINDOW.saturating_sub(now.duration_since(*oldest)) + Duration::from_millis(10)
        })
    }

    /// Record token usage reported by the provider
    pub async fn record_tokens(&self, tokens: u32) {
        let now = Instant::now();
        let mut usage = self.token_usage.lock().await;
        prune(&mut *usage, now, |(at, _)| *at);
        usage.push_back((now, tokens));
    }

    /// Tokens used in the last minute
    pub async fn current_token_usage(&self) -> u32 {
        let mut usage = self.token_usage.lock().await;
        prune(&mut *usage, Instant::now(), |(at, _)| *at);
        usage.iter().map(|&(_, tokens)| tokens).sum()
    }
}

/// Drop entries older than the window from the front of `log`
fn prune<T>(log: &mut VecDeque<T>, now: Instant, stamp: impl Fn(&T) -> Instant) {
    while log
        .front()
        .is_some_and(|entry| now.duration_since(stamp(entry)) > WINDOW)
    {
        log.pop_front();
    }
}
