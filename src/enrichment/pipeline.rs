//! Per-article enrichment: tags, then summary, then embedding
use super::provider::{LanguageModel, ProviderError};
use super::state::{needs_embedding, needs_summary, needs_tags};
use crate::error::{KnowError, Result};
use crate::storage::{Article, ArticleStore};
use crate::tags::TagFrequencyCache;
use crate::vector::VectorIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Enrichment stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tags,
    Summary,
    Embedding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Tags => "tags",
            Stage::Summary => "summary",
            Stage::Embedding => "embedding",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Field was already populated
    AlreadyDone,
    /// Result generated and persisted
    Completed,
    /// Provider returned nothing usable; field left pending
    Empty,
    /// Stage not applicable (vector index disabled)
    Skipped,
    /// Result generated but not applied: the article changed or disappeared meanwhile
    Discarded,
    Failed(String),
    Cancelled,
    /// Run stopped before reaching this stage
    NotRun,
}

/// Per-stage outcome of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub article_id: i64,
    /// False when the article no longer exists; no stage ran
    pub found: bool,
    pub tags: StageOutcome,
    pub summary: StageOutcome,
    pub embedding: StageOutcome,
}

impl RunReport {
    fn missing(article_id: i64) -> Self {
        Self {
            article_id,
            found: false,
            tags: StageOutcome::NotRun,
            summary: StageOutcome::NotRun,
            embedding: StageOutcome::NotRun,
        }
    }

    pub fn outcomes(&self) -> [(Stage, &StageOutcome); 3] {
        [
            (Stage::Tags, &self.tags),
            (Stage::Summary, &self.summary),
            (Stage::Embedding, &self.embedding),
        ]
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes()
            .iter()
            .any(|(_, outcome)| matches!(outcome, StageOutcome::Failed(_)))
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes()
            .iter()
            .any(|(_, outcome)| **outcome == StageOutcome::Cancelled)
    }
}

/// Orchestrates the three enrichment stages for one article at a time
///
/// Each stage runs only when its field is still pending and persists its result
/// immediately, so a failure in a later stage never loses earlier work.
pub struct EnrichmentPipeline {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn ArticleStore>,
    index: Arc<VectorIndex>,
    tags: Arc<TagFrequencyCache>,
    call_timeout: Duration,
}

impl EnrichmentPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn ArticleStore>,
        index: Arc<VectorIndex>,
        tags: Arc<TagFrequencyCache>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            model,
            store,
            index,
            tags,
            call_timeout,
        }
    }

    /// Enrich one article
    ///
    /// Only a failure to load the article is returned as an error; stage failures
    /// are logged and reported in the [`RunReport`].
    pub async fn run(&self, article_id: i64, cancel: &CancellationToken) -> Result<RunReport> {
        let Some(article) = self.store.get(article_id)? else {
            tracing::debug!(article_id, "Article no longer exists, nothing to enrich");
            return Ok(RunReport::missing(article_id));
        };

        let tags = self
            .guard(&article, Stage::Tags, cancel, self.tag_stage(&article, cancel))
            .await;
        let summary = self
            .after(&tags, &article, Stage::Summary, cancel, self.summary_stage(&article, cancel))
            .await;
        let embedding = self
            .after(
                &summary,
                &article,
                Stage::Embedding,
                cancel,
                self.embedding_stage(&article, cancel),
            )
            .await;

        let report = RunReport {
            article_id,
            found: true,
            tags,
            summary,
            embedding,
        };
        tracing::debug!(article_id, ?report, "Enrichment run finished");
        Ok(report)
    }

    /// Run a stage unless the previous one ended the run
    async fn after<F>(
        &self,
        previous: &StageOutcome,
        article: &Article,
        stage: Stage,
        cancel: &CancellationToken,
        fut: F,
    ) -> StageOutcome
    where
        F: Future<Output = Result<StageOutcome>>,
    {
        if matches!(previous, StageOutcome::Cancelled | StageOutcome::NotRun) {
            return StageOutcome::NotRun;
        }
        self.guard(article, stage, cancel, fut).await
    }

    /// Convert a stage error into a logged outcome
    async fn guard<F>(
        &self,
        article: &Article,
        stage: Stage,
        cancel: &CancellationToken,
        fut: F,
    ) -> StageOutcome
    where
        F: Future<Output = Result<StageOutcome>>,
    {
        if cancel.is_cancelled() {
            return StageOutcome::Cancelled;
        }

        match fut.await {
            Ok(outcome) => outcome,
            Err(KnowError::Cancelled) => {
                tracing::info!(article_id = article.id, stage = %stage, "Enrichment cancelled");
                StageOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!(article_id = article.id, stage = %stage, "Enrichment stage failed: {}", e);
                StageOutcome::Failed(e.to_string())
            }
        }
    }

    /// Await a provider call under the per-call deadline and the shutdown token
    async fn call<T, F>(&self, stage: Stage, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KnowError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, fut) => match result {
                Ok(result) => Ok(result?),
                Err(_) => Err(KnowError::Timeout {
                    operation: stage.as_str(),
                    timeout: self.call_timeout,
                }),
            },
        }
    }

    async fn tag_stage(&self, article: &Article, cancel: &CancellationToken) -> Result<StageOutcome> {
        if !needs_tags(article) {
            return Ok(StageOutcome::AlreadyDone);
        }

        let tags = self
            .call(Stage::Tags, cancel, self.model.generate_tags(&article.full_text()))
            .await?;

        // Count first so a delete landing right after the write always has
        // something to decrement; undo when the write does not take
        self.tags.add_tags(&tags);
        match self.store.set_tags_if_pending(article.id, &tags) {
            Ok(true) => {}
            Ok(false) => {
                self.tags.remove_tags(&tags);
                tracing::debug!(article_id = article.id, "Tags already written by another run");
                return Ok(StageOutcome::Discarded);
            }
            Err(e) => {
                self.tags.remove_tags(&tags);
                return Err(e);
            }
        }

        if tags.is_empty() {
            Ok(StageOutcome::Empty)
        } else {
            tracing::debug!(article_id = article.id, ?tags, "Tagged article");
            Ok(StageOutcome::Completed)
        }
    }

    async fn summary_stage(
        &self,
        article: &Article,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        if !needs_summary(article) {
            return Ok(StageOutcome::AlreadyDone);
        }

        let summary = self
            .call(Stage::Summary, cancel, self.model.generate_summary(&article.content))
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Ok(StageOutcome::Empty);
        }

        if self.store.set_summary(article.id, summary)? {
            Ok(StageOutcome::Completed)
        } else {
            Ok(StageOutcome::Discarded)
        }
    }

    async fn embedding_stage(
        &self,
        article: &Article,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        if !self.index.is_enabled() {
            return Ok(StageOutcome::Skipped);
        }
        if !needs_embedding(article) {
            return Ok(StageOutcome::AlreadyDone);
        }

        let vector = self
            .call(Stage::Embedding, cancel, self.model.generate_embedding(&article.full_text()))
            .await?;
        if vector.is_empty() {
            tracing::warn!(
                article_id = article.id,
                stage = %Stage::Embedding,
                "Provider returned an empty embedding, article stays unsearchable"
            );
            return Ok(StageOutcome::Empty);
        }

        self.index.upsert(article.id, &vector)?;
        if !self.store.set_embedded(article.id, true)? {
            // Article deleted while embedding; drop the orphaned vector
            self.index.delete(article.id)?;
            return Ok(StageOutcome::Discarded);
        }

        Ok(StageOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::enrichment::fake::FakeModel;
    use crate::storage::{Database, NewArticle, SqliteArticleStore};
    use tempfile::TempDir;

    const DIM: usize = 4;

    struct Fixture {
        store: Arc<SqliteArticleStore>,
        index: Arc<VectorIndex>,
        tags: Arc<TagFrequencyCache>,
        _temp: TempDir,
    }

    impl Fixture {
        fn new(indexing_enabled: bool) -> Self {
            let temp = TempDir::new().unwrap();
            let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
            let store = Arc::new(SqliteArticleStore::new(db.clone()));
            let index = Arc::new(VectorIndex::open(
                db,
                &IndexingConfig {
                    enabled: indexing_enabled,
                    vector_dim: DIM,
                },
            ));
            let tags = Arc::new(TagFrequencyCache::new());
            tags.initialize(store.as_ref()).unwrap();

            Self {
                store,
                index,
                tags,
                _temp: temp,
            }
        }

        fn pipeline(&self, model: FakeModel) -> (EnrichmentPipeline, Arc<FakeModel>) {
            self.pipeline_with_timeout(model, Duration::from_secs(5))
        }

        fn pipeline_with_timeout(
            &self,
            model: FakeModel,
            timeout: Duration,
        ) -> (EnrichmentPipeline, Arc<FakeModel>) {
            let model = Arc::new(model);
            let pipeline = EnrichmentPipeline::new(
                model.clone(),
                self.store.clone(),
                self.index.clone(),
                self.tags.clone(),
                timeout,
            );
            (pipeline, model)
        }

        fn insert(&self, title: &str) -> Article {
            self.store
                .insert(&NewArticle {
                    title: title.to_string(),
                    content: format!("Content about {}", title),
                    ..Default::default()
                })
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_full_run() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).with_tags(&["Rust", "Async"]));
        let article = fx.insert("Tokio");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert!(report.found);
        assert_eq!(report.tags, StageOutcome::Completed);
        assert_eq!(report.summary, StageOutcome::Completed);
        assert_eq!(report.embedding, StageOutcome::Completed);

        let stored = fx.store.get(article.id).unwrap().unwrap();
        assert_eq!(stored.tags, Some(vec!["Rust".to_string(), "Async".to_string()]));
        assert_eq!(stored.summary.as_deref(), Some("A short summary."));
        assert!(stored.embedded);
        assert!(fx.index.get(article.id).unwrap().is_some());
        assert_eq!(fx.tags.count("rust"), 1);
    }

    #[tokio::test]
    async fn test_completed_stages_are_not_rerun() {
        let fx = Fixture::new(true);
        let (pipeline, model) = fx.pipeline(FakeModel::new(DIM));
        let article = fx.insert("Idempotent");

        pipeline.run(article.id, &CancellationToken::new()).await.unwrap();
        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.tags, StageOutcome::AlreadyDone);
        assert_eq!(report.summary, StageOutcome::AlreadyDone);
        assert_eq!(report.embedding, StageOutcome::AlreadyDone);
        assert_eq!(model.calls(Stage::Tags), 1);
        assert_eq!(fx.tags.count("Rust"), 1);
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_abort_run() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).failing(Stage::Summary));
        let article = fx.insert("Partial");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.tags, StageOutcome::Completed);
        assert!(matches!(report.summary, StageOutcome::Failed(_)));
        assert_eq!(report.embedding, StageOutcome::Completed);
        assert!(report.has_failures());

        let stored = fx.store.get(article.id).unwrap().unwrap();
        assert!(stored.summary.is_none());
        assert!(stored.embedded);
    }

    #[tokio::test]
    async fn test_empty_summary_is_not_persisted() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).with_summary("   "));
        let article = fx.insert("Quiet");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary, StageOutcome::Empty);
        assert!(fx.store.get(article.id).unwrap().unwrap().summary.is_none());
    }

    #[tokio::test]
    async fn test_empty_tags_are_persisted() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).with_tags(&[]));
        let article = fx.insert("Untaggable");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.tags, StageOutcome::Empty);
        assert_eq!(
            fx.store.get(article.id).unwrap().unwrap().tags,
            Some(Vec::new())
        );
        assert!(fx.tags.popular_tags().is_empty());
    }

    #[tokio::test]
    async fn test_zero_length_embedding_is_soft_failure() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).with_embedding("Hollow", vec![]));
        let article = fx.insert("Hollow");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.tags, StageOutcome::Completed);
        assert_eq!(report.summary, StageOutcome::Completed);
        assert_eq!(report.embedding, StageOutcome::Empty);

        let stored = fx.store.get(article.id).unwrap().unwrap();
        assert!(!stored.embedded);
        assert!(fx.index.get(article.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embedding_skipped_when_index_disabled() {
        let fx = Fixture::new(false);
        let (pipeline, model) = fx.pipeline(FakeModel::new(DIM));
        let article = fx.insert("Offline");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.embedding, StageOutcome::Skipped);
        assert_eq!(model.calls(Stage::Embedding), 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_embedding_fails_stage() {
        let fx = Fixture::new(true);
        let (pipeline, _) =
            fx.pipeline(FakeModel::new(DIM).with_embedding("Odd", vec![1.0, 2.0]));
        let article = fx.insert("Odd");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert!(matches!(report.embedding, StageOutcome::Failed(_)));
        assert!(!fx.store.get(article.id).unwrap().unwrap().embedded);
    }

    #[tokio::test]
    async fn test_missing_article_is_noop() {
        let fx = Fixture::new(true);
        let (pipeline, model) = fx.pipeline(FakeModel::new(DIM));

        let report = pipeline.run(999, &CancellationToken::new()).await.unwrap();

        assert!(!report.found);
        assert_eq!(model.calls(Stage::Tags), 0);
    }

    #[tokio::test]
    async fn test_timeout_fails_only_that_stage() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline_with_timeout(
            FakeModel::new(DIM).hanging(Stage::Tags),
            Duration::from_millis(50),
        );
        let article = fx.insert("Slow");

        let report = pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        match &report.tags {
            StageOutcome::Failed(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.summary, StageOutcome::Completed);
        assert!(fx.store.get(article.id).unwrap().unwrap().tags.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let fx = Fixture::new(true);
        let (pipeline, model) = fx.pipeline(FakeModel::new(DIM).hanging(Stage::Summary));
        let article = fx.insert("Interrupted");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = pipeline.run(article.id, &cancel).await.unwrap();

        assert_eq!(report.tags, StageOutcome::Completed);
        assert_eq!(report.summary, StageOutcome::Cancelled);
        assert_eq!(report.embedding, StageOutcome::NotRun);
        assert!(report.was_cancelled());
        assert_eq!(model.calls(Stage::Embedding), 0);
    }

    #[tokio::test]
    async fn test_article_deleted_mid_run_leaves_no_vector() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM));
        let article = fx.insert("Ephemeral");

        // Simulate deletion between load and the embedding write
        fx.store.delete(article.id).unwrap();
        let outcome = pipeline
            .embedding_stage(&article, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Discarded);
        assert!(fx.index.get(article.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_tag_runs_count_once() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(
            FakeModel::new(DIM)
                .with_tags(&["Shared"])
                .with_delay(Duration::from_millis(20)),
        );
        let pipeline = Arc::new(pipeline);
        let article = fx.insert("Racy");

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(article.id, &CancellationToken::new()).await })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(article.id, &CancellationToken::new()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(fx.tags.count("shared"), 1);
    }

    /// Store that deletes the article, the way the service does, right after
    /// the tag write lands
    struct DeleteAfterTagWrite {
        inner: Arc<SqliteArticleStore>,
        tags: Arc<TagFrequencyCache>,
    }

    impl ArticleStore for DeleteAfterTagWrite {
        fn insert(&self, article: &NewArticle) -> Result<Article> {
            self.inner.insert(article)
        }

        fn get(&self, id: i64) -> Result<Option<Article>> {
            self.inner.get(id)
        }

        fn edit(&self, id: i64, edit: &crate::storage::ArticleEdit) -> Result<Option<Article>> {
            self.inner.edit(id, edit)
        }

        fn delete(&self, id: i64) -> Result<Option<Article>> {
            self.inner.delete(id)
        }

        fn set_tags_if_pending(&self, id: i64, tags: &[String]) -> Result<bool> {
            let written = self.inner.set_tags_if_pending(id, tags)?;
            if written {
                if let Some(removed) = self.inner.delete(id)? {
                    self.tags.remove_tags(removed.tag_list());
                }
            }
            Ok(written)
        }

        fn set_summary(&self, id: i64, summary: &str) -> Result<bool> {
            self.inner.set_summary(id, summary)
        }

        fn set_embedded(&self, id: i64, embedded: bool) -> Result<bool> {
            self.inner.set_embedded(id, embedded)
        }

        fn all_tag_sets(&self) -> Result<Vec<Vec<String>>> {
            self.inner.all_tag_sets()
        }

        fn list(&self) -> Result<Vec<Article>> {
            self.inner.list()
        }

        fn clear(&self) -> Result<usize> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn test_delete_right_after_tag_write_leaves_no_count() {
        let fx = Fixture::new(true);
        let store = Arc::new(DeleteAfterTagWrite {
            inner: fx.store.clone(),
            tags: fx.tags.clone(),
        });
        let pipeline = EnrichmentPipeline::new(
            Arc::new(FakeModel::new(DIM).with_tags(&["Fleeting"])),
            store,
            fx.index.clone(),
            fx.tags.clone(),
            Duration::from_secs(5),
        );
        let article = fx.insert("Gone soon");

        pipeline.run(article.id, &CancellationToken::new()).await.unwrap();

        assert!(fx.store.get(article.id).unwrap().is_none());
        assert_eq!(fx.tags.count("fleeting"), 0);
        assert!(fx.tags.popular_tags().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_tag_write_rolls_back_count() {
        let fx = Fixture::new(true);
        let (pipeline, _) = fx.pipeline(FakeModel::new(DIM).with_tags(&["Late"]));
        let article = fx.insert("Already tagged");
        fx.store
            .set_tags_if_pending(article.id, &["Early".to_string()])
            .unwrap();

        let outcome = pipeline
            .tag_stage(&article, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Discarded);
        assert_eq!(fx.tags.count("late"), 0);
    }
}
