//! Gemini REST client
//!
//! Talks to the `generateContent` and `embedContent` endpoints of the Generative
//! Language API. The API key is read from the environment variable named in
//! `llm.api_key_env` and sent in the `x-goog-api-key` header.

use super::provider::{LanguageModel, ProviderError};
use crate::config::LlmConfig;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str = concat!("know/", env!("CARGO_PKG_VERSION"));
const CODE_FENCE_PATTERN: &str = r"```(?:json)?";

const TAG_PROMPT: &str = "Identify 2-5 general, high-level technical topics, categories, or domains that the following text belongs to.
Avoid overly specific terms; prefer broader categories (e.g., 'Web Development' instead of 'React Hooks', 'History' instead of 'Bixby Letter').
Output ONLY a JSON array of strings.
Do NOT output any other text, explanation, or markdown formatting.

Text:
";

const SUMMARY_PROMPT: &str = "Create a concise 2-sentence summary of the following technical text.
Do not include any introductory text. Just return the summary itself.

Text:
";

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    output_dimensionality: usize,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate, empty when absent
    fn first_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default()
    }
}

/// Gemini implementation of [`LanguageModel`]
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_output_tokens: u32,
    dimension: usize,
    code_fence: Regex,
}

impl GeminiClient {
    /// Build a client, reading the API key from the configured environment variable
    pub fn from_config(
        config: &LlmConfig,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "environment variable {} is not set",
                    config.api_key_env
                ))
            })?;

        Self::with_api_key(config, api_key, dimension, timeout)
    }

    pub fn with_api_key(
        config: &LlmConfig,
        api_key: String,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        let code_fence = Regex::new(CODE_FENCE_PATTERN)
            .map_err(|e| ProviderError::NotConfigured(format!("Invalid fence pattern: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            dimension,
            code_fence,
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let response = self
            .http_client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn generate_content(
        &self,
        prompt: &str,
        mime_type: Option<&'static str>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: mime_type,
            },
        };

        let response: GenerateResponse = self.post(&url, &request).await?;
        Ok(response.first_text())
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, ProviderError> {
        let prompt = format!("{}{}", TAG_PROMPT, text);
        let output = self
            .generate_content(&prompt, Some("application/json"))
            .await?;
        Ok(parse_tags(&self.code_fence, &output))
    }

    async fn generate_summary(&self, text: &str) -> Result<String, ProviderError> {
        let prompt = format!("{}{}", SUMMARY_PROMPT, text);
        let summary = self.generate_content(&prompt, None).await?;
        Ok(summary.trim().to_string())
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "{}/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let request = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part { text }],
            },
            output_dimensionality: self.dimension,
        };

        let response: EmbedResponse = self.post(&url, &request).await?;
        Ok(response.embedding.map(|e| e.values).unwrap_or_default())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Parse a JSON array of tags, tolerating markdown code fences
///
/// Output that still fails to parse yields no tags.
fn parse_tags(code_fence: &Regex, output: &str) -> Vec<String> {
    let cleaned = code_fence.replace_all(output, "");
    match serde_json::from_str::<Vec<String>>(cleaned.trim()) {
        Ok(tags) => tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to parse tags from model output {:?}: {}", output, e);
            Vec::new()
        }
    }
}
