//! Shared HTTP transport for provider clients.
//!
//! Every provider speaks JSON over POST. The transport owns the `reqwest`
//! client, the rate limiter and the retry loop, and maps HTTP failures onto
//! [`ProviderError`]. Wire formats live in the provider modules.

use crate::client::RateLimiter;
use crate::models::{EvalsynthError, ProviderError, Result};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// JSON-over-HTTP transport with rate limiting and retries.
pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
    headers: HeaderMap,
    timeout: Duration,
    max_attempts: u32,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpTransport {
    /// Build a transport.
    ///
    /// `headers` are sent with every request (auth, API version, ...).
    /// `max_attempts` of 1 disables retries.
    pub fn new(
        provider: impl Into<String>,
        headers: Vec<(&'static str, String)>,
        timeout_secs: u64,
        max_attempts: u32,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let provider = provider.into();
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EvalsynthError::Network)?;

        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let value = HeaderValue::from_str(&value).map_err(|_| {
                EvalsynthError::InvalidInput(format!(
                    "{provider}: header '{name}' contains invalid characters"
                ))
            })?;
            header_map.insert(HeaderName::from_static(name), value);
        }

        Ok(Self {
            client,
            provider,
            headers: header_map,
            timeout,
            max_attempts: max_attempts.max(1),
            rate_limiter: rate_limiter.unwrap_or_default(),
        })
    }

    /// POST `body` to `url` and decode the JSON response.
    ///
    /// 401/403 and 404 are not retried. Everything else is retried up to
    /// `max_attempts` with exponential backoff (or the server's
    /// `retry-after` on 429).
    pub async fn post_json<B, R>(&self, url: &str, model: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut last_error: Option<EvalsynthError> = None;

        for attempt in 0..self.max_attempts {
            let is_last = attempt + 1 == self.max_attempts;
            self.rate_limiter.wait_if_needed(model).await;

            let started = Instant::now();
            let response = match self
                .client
                .post(url)
                .headers(self.headers.clone())
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        EvalsynthError::Timeout(self.timeout)
                    } else {
                        EvalsynthError::Network(e)
                    });
                    if !is_last {
                        self.backoff(attempt, "network error").await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok());
            self.rate_limiter
                .record_response(model, status, response.headers(), retry_after);

            debug!(
                provider = %self.provider,
                model,
                status,
                attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Provider responded"
            );

            if status == 429 {
                let message = response.text().await.unwrap_or_default();
                last_error = Some(
                    ProviderError::RateLimited {
                        provider: self.provider.clone(),
                        message: error_message(&message),
                        retry_after_secs: retry_after,
                    }
                    .into(),
                );
                // The rate limiter already holds the backoff for the next attempt
                continue;
            }

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                let error = match status {
                    401 | 403 => ProviderError::AuthenticationFailed {
                        provider: self.provider.clone(),
                    },
                    404 => ProviderError::ModelNotFound(model.to_string()),
                    _ => ProviderError::ApiError {
                        status,
                        message: error_message(&body),
                    },
                };
                let fatal = matches!(
                    error,
                    ProviderError::AuthenticationFailed { .. } | ProviderError::ModelNotFound(_)
                );
                last_error = Some(error.into());
                if fatal {
                    break;
                }
                if !is_last {
                    self.backoff(attempt, "server error").await;
                }
                continue;
            }

            return response.json::<R>().await.map_err(|e| {
                ProviderError::InvalidResponse(format!("{}: {e}", self.provider)).into()
            });
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::MaxRetriesExceeded {
                attempts: self.max_attempts,
                last_error: "no attempt was made".to_string(),
            }
            .into()
        }))
    }

    async fn backoff(&self, attempt: u32, reason: &str) {
        let delay = Duration::from_secs(2u64.pow(attempt.min(5)));
        debug!(
            provider = %self.provider,
            attempt,
            backoff_secs = delay.as_secs(),
            reason,
            "Retrying request"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands the `{"error": {"message": ...}}` shape all three APIs use,
/// and falls back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(attempts: u32) -> HttpTransport {
        HttpTransport::new(
            "test",
            vec![("x-api-key", "secret".to_string())],
            5,
            attempts,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_sends_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/thing"))
            .and(header("x-api-key", "secret"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/v1/thing", server.uri());
        let body: Value = transport(1)
            .post_json(&url, "m", &json!({"q": 1}))
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "bad key"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(3)
            .post_json::<_, Value>(&server.uri(), "m", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalsynthError::Provider(ProviderError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_attempt_reports_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({"error": {"message": "overloaded"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(1)
            .post_json::<_, Value>(&server.uri(), "m", &json!({}))
            .await
            .unwrap_err();
        match err {
            EvalsynthError::Provider(ProviderError::ApiError { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transport(1)
            .post_json::<_, Value>(&server.uri(), "m", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalsynthError::Provider(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error": {"message": "nope"}}"#), "nope");
        assert_eq!(error_message(" plain text \n"), "plain text");
    }
}
