//! Local embedding generation with fastembed
//!
//! Tags and summaries still come from the remote language model; only the
//! embedding stage runs in-process, so search keeps working without an
//! embedding endpoint.

use super::provider::{LanguageModel, ProviderError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

/// Synchronous text embedder
///
/// Kept separate from [`LanguageModel`] so the local model can be swapped for a
/// deterministic double in tests.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Supported local models: (name, dimension, approximate download size in MB)
const LOCAL_MODELS: &[(&str, usize, u32)] = &[
    ("all-MiniLM-L6-v2", 384, 90),
    ("bge-small-en-v1.5", 384, 130),
    ("bge-base-en-v1.5", 768, 440),
];

/// Output dimension of a supported local model
pub fn local_model_dimension(name: &str) -> Option<usize> {
    LOCAL_MODELS
        .iter()
        .find(|(known, _, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, dimension, _)| *dimension)
}

fn fastembed_model(name: &str) -> Option<EmbeddingModel> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        _ => None,
    }
}

/// fastembed-backed embedder
///
/// The model is downloaded to the Hugging Face cache on first use.
pub struct FastEmbedder {
    model: TextEmbedding,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    pub fn new(model_name: &str) -> Result<Self, ProviderError> {
        let (embedding_model, (_, dimension, size_mb)) = fastembed_model(model_name)
            .zip(
                LOCAL_MODELS
                    .iter()
                    .find(|(known, _, _)| known.eq_ignore_ascii_case(model_name)),
            )
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unsupported local embedding model '{}', expected one of {:?}",
                    model_name,
                    LOCAL_MODELS.iter().map(|(name, _, _)| *name).collect::<Vec<_>>()
                ))
            })?;

        tracing::info!(
            "Loading local embedding model {} ({}D, ~{}MB download if not cached)",
            model_name,
            dimension,
            size_mb
        );

        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to load {}: {}", model_name, e)))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
            dimension: *dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| ProviderError::Request(format!("Local embedding failed: {}", e)))?;

        let embedding = embeddings
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("No embedding generated".to_string()))?;
        if embedding.len() != self.dimension {
            return Err(ProviderError::InvalidResponse(format!(
                "Expected {} dimensions, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Language model that generates text remotely and embeddings locally
pub struct LocalEmbeddingModel {
    text: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    name: String,
}

impl LocalEmbeddingModel {
    pub fn new(text: Arc<dyn LanguageModel>, embedder: Arc<dyn Embedder>) -> Self {
        let name = format!("{}+{}", text.name(), embedder.model_name());
        Self {
            text,
            embedder,
            name,
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}

#[async_trait]
impl LanguageModel for LocalEmbeddingModel {
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, ProviderError> {
        self.text.generate_tags(text).await
    }

    async fn generate_summary(&self, text: &str) -> Result<String, ProviderError> {
        self.text.generate_summary(text).await
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Inference is CPU bound; keep it off the runtime workers
        let embedder = self.embedder.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| ProviderError::Request(format!("Embedding task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}
