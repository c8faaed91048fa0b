//! OpenAI-compatible chat completions provider (OpenAI and Grok).

use crate::client::{HttpTransport, Provider, RateLimiter};
use crate::models::{ProviderError, ProviderKind, ResolvedProvider, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Provider for any endpoint speaking the `/chat/completions` schema.
pub struct OpenAiProvider {
    kind: ProviderKind,
    model: String,
    url: String,
    transport: HttpTransport,
}

impl OpenAiProvider {
    pub fn new(settings: &ResolvedProvider, rate_limiter: Option<Arc<RateLimiter>>) -> Result<Self> {
        let transport = HttpTransport::new(
            settings.kind.as_str(),
            vec![("authorization", format!("Bearer {}", settings.api_key))],
            settings.timeout_secs,
            settings.max_retries,
            rate_limiter,
        )?;
        Ok(Self {
            kind: settings.kind,
            model: settings.model.clone(),
            url: format!("{}/chat/completions", settings.base_url),
            transport,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt,
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        let response: ChatCompletionResponse = self
            .transport
            .post_json(&self.url, &self.model, &request)
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!("{}: no choices in response", self.kind))
                    .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvalsynthError;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(kind: ProviderKind, base_url: String) -> ResolvedProvider {
        ResolvedProvider {
            kind,
            api_key: "sk-test".to_string(),
            model: "gpt-test".to_string(),
            base_url,
            timeout_secs: 5,
            max_retries: 1,
            weight: 1,
        }
    }

    #[tokio::test]
    async fn test_generate_sends_system_and_user_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "max_tokens": 16000,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "usr"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "[{\"id\": 1}]"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(
            &settings(ProviderKind::Grok, format!("{}/v1", server.uri())),
            None,
        )
        .unwrap();
        assert_eq!(provider.name(), "grok");

        let text = provider.generate("sys", "usr", 0.7, 16000).await.unwrap();
        assert_eq!(text, "[{\"id\": 1}]");
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let provider =
            OpenAiProvider::new(&settings(ProviderKind::OpenAi, server.uri()), None).unwrap();
        let err = provider.generate("s", "u", 0.7, 10).await.unwrap_err();
        assert!(matches!(
            err,
            EvalsynthError::Provider(ProviderError::InvalidResponse(_))
        ));
    }
}
