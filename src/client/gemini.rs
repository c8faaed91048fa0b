//! Google Gemini `generateContent` provider.

use crate::client::{HttpTransport, Provider, RateLimiter};
use crate::models::{ProviderError, ResolvedProvider, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiProvider {
    model: String,
    url: String,
    transport: HttpTransport,
}

impl GeminiProvider {
    pub fn new(settings: &ResolvedProvider, rate_limiter: Option<Arc<RateLimiter>>) -> Result<Self> {
        let transport = HttpTransport::new(
            settings.kind.as_str(),
            vec![("x-goog-api-key", settings.api_key.clone())],
            settings.timeout_secs,
            settings.max_retries,
            rate_limiter,
        )?;
        Ok(Self {
            model: settings.model.clone(),
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                settings.base_url, settings.model
            ),
            transport,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
        let request = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: system_prompt,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: user_prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
        };

        let response: GenerateContentResponse = self
            .transport
            .post_json(&self.url, &self.model, &request)
            .await?;

        // Long answers may be split across several parts
        let content = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or_else(|| ProviderError::InvalidResponse("gemini: no candidates".into()))?;
        Ok(content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<String>())
    }
}
