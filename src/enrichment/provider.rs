//! Language model capability used by the enrichment pipeline
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

/// Text and embedding generation backend
///
/// Keeps pipeline logic provider-agnostic; tests substitute a deterministic fake.
/// Implementations must not retry: a failed call is terminal for that stage.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Suggest topic tags for a text (typically 2-5)
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, ProviderError>;

    /// Produce a short summary of a text
    async fn generate_summary(&self, text: &str) -> Result<String, ProviderError>;

    /// Embed a text into a fixed-length vector
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Get the provider name
    fn name(&self) -> &str;
}
