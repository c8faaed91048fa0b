//! Anthropic Messages API provider.

use crate::client::{HttpTransport, Provider, RateLimiter};
use crate::models::{ProviderError, ResolvedProvider, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    model: String,
    url: String,
    transport: HttpTransport,
}

impl AnthropicProvider {
    pub fn new(settings: &ResolvedProvider, rate_limiter: Option<Arc<RateLimiter>>) -> Result<Self> {
        let transport = HttpTransport::new(
            settings.kind.as_str(),
            vec![
                ("x-api-key", settings.api_key.clone()),
                ("anthropic-version", API_VERSION.to_string()),
            ],
            settings.timeout_secs,
            settings.max_retries,
            rate_limiter,
        )?;
        Ok(Self {
            model: settings.model.clone(),
            url: format!("{}/v1/messages", settings.base_url),
            transport,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        let request = MessagesRequest {
            model: &self.model,
            system: system_prompt,
            messages: [UserMessage {
                role: "user",
                content: user_prompt,
            }],
            max_tokens,
            temperature,
        };

        let response: MessagesResponse = self
            .transport
            .post_json(&self.url, &self.model, &request)
            .await?;

        // First text block carries the answer
        response
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("anthropic: no text content in response".into())
                    .into()
            })
    }
}
