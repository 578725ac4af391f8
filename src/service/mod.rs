//! Article write path and read surface
//!
//! [`ArticleService`] is the only place articles are created, edited or deleted.
//! It keeps the tag cache and vector index consistent with the store and hands
//! new work to the enrichment queue without waiting for it.

mod seed;

pub use seed::{DatasetSeeder, DEFAULT_DATASET_URL};

use crate::daemon::EnrichmentQueue;
use crate::enrichment::{needs_sweep, LanguageModel};
use crate::error::{KnowError, Result};
use crate::storage::{Article, ArticleEdit, ArticleStore, NewArticle};
use crate::tags::{TagCount, TagFrequencyCache};
use crate::vector::VectorIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// An article matched by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub article: Article,
    /// Cosine distance to the query, in [0, 1)
    pub distance: f64,
}

pub struct ArticleService {
    store: Arc<dyn ArticleStore>,
    index: Arc<VectorIndex>,
    tags: Arc<TagFrequencyCache>,
    queue: Arc<EnrichmentQueue>,
    model: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl ArticleService {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        index: Arc<VectorIndex>,
        tags: Arc<TagFrequencyCache>,
        queue: Arc<EnrichmentQueue>,
        model: Arc<dyn LanguageModel>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            tags,
            queue,
            model,
            call_timeout,
        }
    }

    /// Queue an article, logging rather than failing when the queue is closed
    fn schedule(&self, article_id: i64) {
        if let Err(e) = self.queue.enqueue(article_id) {
            tracing::warn!(article_id, "Article saved but not queued for enrichment: {}", e);
        }
    }

    /// Store a new article and queue it for enrichment
    pub fn create(&self, article: &NewArticle) -> Result<Article> {
        let created = self.store.insert(article)?;
        self.tags.add_tags(created.tag_list());
        self.schedule(created.id);

        tracing::info!(article_id = created.id, "Created article {:?}", created.title);
        Ok(created)
    }

    /// Store a batch of articles in one write, then queue each for enrichment
    pub fn create_many(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        let created = self.store.insert_many(articles)?;
        for article in &created {
            self.tags.add_tags(article.tag_list());
            self.schedule(article.id);
        }

        tracing::info!("Created {} articles", created.len());
        Ok(created)
    }

    /// Replace title, content and category; enrichment starts over
    ///
    /// Tags supplied with the edit replace the old ones, otherwise they are regenerated.
    pub fn update(&self, id: i64, edit: &ArticleEdit) -> Result<Article> {
        let previous = self
            .store
            .edit(id, edit)?
            .ok_or(KnowError::ArticleNotFound { id })?;
        match edit.tags.as_deref() {
            Some(tags) if !tags.is_empty() => self.tags.update_tags(previous.tag_list(), tags),
            _ => self.tags.remove_tags(previous.tag_list()),
        }
        // The old vector describes the old text; drop it until re-embedded
        if let Err(e) = self.index.delete(id) {
            tracing::warn!(article_id = id, "Failed to delete stale article vector: {}", e);
        }
        self.schedule(id);

        tracing::info!(article_id = id, "Updated article");
        self.store.get(id)?.ok_or(KnowError::ArticleNotFound { id })
    }

    /// Delete an article and its derived data; returns false if it did not exist
    pub fn delete(&self, id: i64) -> Result<bool> {
        let Some(removed) = self.store.delete(id)? else {
            return Ok(false);
        };

        self.tags.remove_tags(removed.tag_list());
        // Search joins against articles, so a leftover vector is never returned
        if let Err(e) = self.index.delete(id) {
            tracing::warn!(article_id = id, "Failed to delete article vector: {}", e);
        }

        tracing::info!(article_id = id, "Deleted article");
        Ok(true)
    }

    pub fn get(&self, id: i64) -> Result<Option<Article>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<Article>> {
        self.store.list()
    }

    /// Embed a free-text query and return the nearest articles
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.index.is_enabled() || limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = tokio::time::timeout(self.call_timeout, self.model.generate_embedding(query))
            .await
            .map_err(|_| KnowError::Timeout {
                operation: "search",
                timeout: self.call_timeout,
            })??;
        if vector.is_empty() {
            tracing::warn!("Provider returned an empty embedding for search query");
            return Ok(Vec::new());
        }

        self.search_vector(&vector, limit)
    }

    /// Nearest articles to an embedding, closest first
    pub fn search_vector(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let matches = self.index.search(vector, limit)?;

        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            // Deleted between the index query and this lookup
            if let Some(article) = self.store.get(m.article_id)? {
                hits.push(SearchHit {
                    article,
                    distance: m.distance,
                });
            }
        }
        Ok(hits)
    }

    pub fn popular_tags(&self) -> Vec<TagCount> {
        self.tags.popular_tags()
    }

    /// Re-queue every article missing tags or a summary
    pub fn sweep(&self) -> Result<usize> {
        let mut queued = 0;
        for article in self.store.list()?.iter().filter(|a| needs_sweep(a)) {
            self.queue.enqueue(article.id)?;
            queued += 1;
        }

        tracing::info!("Sweep queued {} articles for enrichment", queued);
        Ok(queued)
    }

    /// Queue a single article regardless of its enrichment state
    pub fn reprocess(&self, id: i64) -> Result<()> {
        if self.store.get(id)?.is_none() {
            return Err(KnowError::ArticleNotFound { id });
        }
        self.queue.enqueue(id)
    }

    /// Remove every article, vector and tag count; returns the number of articles removed
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.store.clear()?;
        self.index.clear()?;
        self.tags.clear();

        tracing::warn!("Cleared all data: {} articles removed", removed);
        Ok(removed)
    }
}
