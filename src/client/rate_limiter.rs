//! Adaptive rate limiting shared by all HTTP providers.
//!
//! State is tracked per model. It is fed from response headers after every
//! call and consulted before the next one:
//! - OpenAI-style `x-ratelimit-*` headers (Grok uses the same family), with
//!   reset values in seconds
//! - Anthropic `anthropic-ratelimit-requests-*` headers, with RFC 3339 reset
//!   timestamps
//!
//! A 429 triggers exponential backoff capped at 60 seconds.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_BACKOFF_SECS: f64 = 60.0;

/// Rate limit state for a single model.
#[derive(Debug, Default)]
pub struct ModelRateState {
    pub remaining_requests: Option<u32>,
    pub remaining_tokens: Option<u32>,
    pub reset_requests_at: Option<Instant>,
    pub reset_tokens_at: Option<Instant>,
    pub consecutive_429s: u32,
    pub backoff_until: Option<Instant>,
}

impl ModelRateState {
    /// Time to wait before the next request may go out.
    pub fn wait_time(&self, now: Instant) -> Duration {
        let until = |deadline: Option<Instant>| {
            deadline
                .filter(|&t| t > now)
                .map(|t| t - now)
                .unwrap_or(Duration::ZERO)
        };

        let mut wait = until(self.backoff_until);
        if self.remaining_requests == Some(0) {
            wait = wait.max(until(self.reset_requests_at));
        }
        if self.remaining_tokens == Some(0) {
            wait = wait.max(until(self.reset_tokens_at));
        }
        wait
    }

    fn record_429(&mut self, now: Instant, retry_after: Option<f64>) {
        self.consecutive_429s += 1;
        let backoff_secs = retry_after
            .unwrap_or_else(|| 2.0_f64.powi(self.consecutive_429s as i32))
            .clamp(0.0, MAX_BACKOFF_SECS);
        self.backoff_until = Some(now + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs, "Rate limited (429), backing off"
        );
    }

    fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    fn update_from_headers(&mut self, headers: &HeaderMap, now: Instant) {
        let header = |key: &str| headers.get(key)?.to_str().ok().map(str::trim);

        if let Some(v) = header("x-ratelimit-remaining-requests")
            .or_else(|| header("anthropic-ratelimit-requests-remaining"))
        {
            self.remaining_requests = v.parse().ok();
        }
        if let Some(v) = header("x-ratelimit-remaining-tokens")
            .or_else(|| header("anthropic-ratelimit-tokens-remaining"))
        {
            self.remaining_tokens = v.parse().ok();
        }
        if let Some(delay) = header("x-ratelimit-reset-requests")
            .and_then(parse_seconds)
            .or_else(|| header("anthropic-ratelimit-requests-reset").and_then(parse_timestamp))
        {
            self.reset_requests_at = Some(now + delay);
        }
        if let Some(delay) = header("x-ratelimit-reset-tokens")
            .and_then(parse_seconds)
            .or_else(|| header("anthropic-ratelimit-tokens-reset").and_then(parse_timestamp))
        {
            self.reset_tokens_at = Some(now + delay);
        }
    }
}

/// Parse a reset delay given in seconds, with or without an `s` suffix.
fn parse_seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim_end_matches('s').parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Parse an RFC 3339 reset timestamp into a delay from now.
fn parse_timestamp(value: &str) -> Option<Duration> {
    let reset = DateTime::parse_from_rfc3339(value).ok()?;
    (reset.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

/// Per-model adaptive rate limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ModelRateState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until `model` may be called again. Returns the time waited.
    pub async fn wait_if_needed(&self, model: &str) -> Duration {
        let wait = self
            .states
            .get(model)
            .map(|state| state.wait_time(Instant::now()))
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            debug!(model, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record the outcome of a request.
    pub fn record_response(
        &self,
        model: &str,
        status: u16,
        headers: &HeaderMap,
        retry_after: Option<f64>,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.states.entry(model.to_string()).or_default();
        state.update_from_headers(headers, now);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(now, retry_after);
        } else if status < 400 {
            state.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            models_tracked: self.states.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub models_tracked: usize,
}
