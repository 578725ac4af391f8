//! Enrichment progress derived from an article's stored fields
use crate::storage::Article;
use serde::{Deserialize, Serialize};

/// How far enrichment has progressed for an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    Pending,
    Tagged,
    Summarized,
    Embedded,
}

impl EnrichmentState {
    /// Derive the state of an article, by the earliest stage still outstanding
    pub fn of(article: &Article) -> Self {
        if needs_tags(article) {
            EnrichmentState::Pending
        } else if needs_summary(article) {
            EnrichmentState::Tagged
        } else if needs_embedding(article) {
            EnrichmentState::Summarized
        } else {
            EnrichmentState::Embedded
        }
    }
}

/// Tags were never generated, or generation produced none
pub fn needs_tags(article: &Article) -> bool {
    article.tags.as_ref().map_or(true, |tags| tags.is_empty())
}

pub fn needs_summary(article: &Article) -> bool {
    article
        .summary
        .as_deref()
        .map_or(true, |summary| summary.trim().is_empty())
}

pub fn needs_embedding(article: &Article) -> bool {
    !article.embedded
}

/// Whether the administrative sweep should re-enqueue an article
///
/// Embedding state is deliberately not considered; see `ArticleService::reprocess`.
pub fn needs_sweep(article: &Article) -> bool {
    needs_tags(article) || needs_summary(article)
}
