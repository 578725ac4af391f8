//! Background enrichment of articles
//!
//! Every stored article is eventually given topic tags, a short summary and an
//! embedding vector by an external language model. The [`EnrichmentPipeline`]
//! runs the three stages for one article; scheduling lives in [`crate::daemon`].
//! Embeddings may instead be computed locally by [`LocalEmbeddingModel`].

#[cfg(test)]
pub(crate) mod fake;
mod gemini;
mod local;
mod pipeline;
mod provider;
mod state;

pub use gemini::GeminiClient;
pub use local::{local_model_dimension, Embedder, FastEmbedder, LocalEmbeddingModel};
pub use pipeline::{EnrichmentPipeline, RunReport, Stage, StageOutcome};
pub use provider::{LanguageModel, ProviderError};
pub use state::{needs_embedding, needs_summary, needs_sweep, needs_tags, EnrichmentState};
