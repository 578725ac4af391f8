// Bounded-concurrency consumer of the enrichment queue

use crate::daemon::queue::EnrichmentQueue;
use crate::enrichment::{EnrichmentPipeline, RunReport};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for in-flight jobs before abandoning them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Counters of finished jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Runs that finished without a failed stage
    pub processed: u64,
    /// Runs with a failed stage, a load error, or a panic
    pub failed: u64,
    /// Runs for deleted articles or interrupted by shutdown
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, article_id: i64, result: std::result::Result<Result<RunReport>, JoinError>) {
        match result {
            Ok(Ok(report)) if !report.found || report.was_cancelled() => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(report)) if report.has_failures() => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(_)) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                tracing::error!(article_id, "Enrichment job failed: {}", e);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_panic() => {
                tracing::error!(article_id, "Enrichment job panicked");
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                tracing::debug!(article_id, "Enrichment job aborted");
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Runs the enrichment pipeline for queued articles, at most `concurrency` at a time
///
/// The dispatcher never waits for a free slot: each dequeued id becomes its own
/// task that acquires a semaphore permit before running, so the queue keeps
/// draining into tasks even when every slot is busy.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start consuming `queue`
    ///
    /// `cancel` stops the dispatcher and is forwarded to every running pipeline.
    pub fn start(
        pipeline: Arc<EnrichmentPipeline>,
        queue: Arc<EnrichmentQueue>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let counters = Arc::new(Counters::default());

        let dispatcher = tokio::spawn(dispatch(
            pipeline,
            queue,
            semaphore.clone(),
            counters.clone(),
            cancel.clone(),
        ));

        tracing::info!("Worker pool started with {} slots", concurrency);

        Self {
            semaphore,
            concurrency,
            cancel,
            counters,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of jobs currently holding a slot
    pub fn active(&self) -> usize {
        self.concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Cancel outstanding work and wait for in-flight jobs to wind down
    ///
    /// Calling this more than once only returns the final counters.
    pub async fn shutdown(&self) -> WorkerStats {
        self.cancel.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut dispatcher) = dispatcher {
            tracing::info!("Waiting for enrichment jobs to finish...");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut dispatcher).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Worker dispatcher terminated abnormally: {}", e),
                Err(_) => {
                    tracing::warn!(
                        "Enrichment jobs still running after {:?}, abandoning them",
                        SHUTDOWN_GRACE
                    );
                    dispatcher.abort();
                }
            }
        }

        let stats = self.counters.snapshot();
        tracing::info!(
            "Worker pool stopped: {} processed, {} failed, {} skipped",
            stats.processed,
            stats.failed,
            stats.skipped
        );
        stats
    }
}

async fn dispatch(
    pipeline: Arc<EnrichmentPipeline>,
    queue: Arc<EnrichmentQueue>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let mut jobs = JoinSet::new();

    loop {
        tokio::select! {
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Enrichment task failed to join: {}", e);
                }
            }

            next = queue.dequeue(&cancel) => match next {
                Some(article_id) => {
                    jobs.spawn(run_job(
                        article_id,
                        pipeline.clone(),
                        semaphore.clone(),
                        counters.clone(),
                        cancel.clone(),
                    ));
                }
                None => break,
            },
        }
    }

    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Enrichment task failed to join: {}", e);
        }
    }
}

async fn run_job(
    article_id: i64,
    pipeline: Arc<EnrichmentPipeline>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    // Inner task isolates panics so the article id can be reported
    let run = AbortOnDrop(tokio::spawn(async move {
        pipeline.run(article_id, &cancel).await
    }));
    counters.record(article_id, run.await);
}

/// Join handle that aborts its task when dropped
///
/// Aborting a job (for example when shutdown gives up on the dispatcher) drops
/// the outer future; this carries the abort through to the pipeline run.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::enrichment::fake::FakeModel;
    use crate::enrichment::LanguageModel;
    use crate::storage::{ArticleStore, Database, NewArticle, SqliteArticleStore};
    use crate::tags::TagFrequencyCache;
    use crate::vector::VectorIndex;
    use tempfile::TempDir;

    struct Harness {
        store: Arc<SqliteArticleStore>,
        queue: Arc<EnrichmentQueue>,
        pipeline: Arc<EnrichmentPipeline>,
        _temp: TempDir,
    }

    fn harness(model: Arc<dyn LanguageModel>) -> Harness {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let store = Arc::new(SqliteArticleStore::new(db.clone()));
        let index = Arc::new(VectorIndex::open(
            db,
            &IndexingConfig {
                enabled: true,
                vector_dim: 4,
            },
        ));
        let tags = Arc::new(TagFrequencyCache::new());
        tags.initialize(store.as_ref()).unwrap();

        let pipeline = Arc::new(EnrichmentPipeline::new(
            model,
            store.clone(),
            index,
            tags,
            Duration::from_secs(5),
        ));

        Harness {
            store,
            queue: Arc::new(EnrichmentQueue::new()),
            pipeline,
            _temp: temp,
        }
    }

    fn insert(store: &SqliteArticleStore, title: &str) -> i64 {
        store
            .insert(&NewArticle {
                title: title.to_string(),
                content: "body".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    async fn wait_for(pool: &WorkerPool, finished: u64) -> WorkerStats {
        for _ in 0..500 {
            let stats = pool.stats();
            if stats.processed + stats.failed + stats.skipped >= finished {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not finish: {:?}", pool.stats());
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let model = Arc::new(FakeModel::new(4).with_delay(Duration::from_millis(20)));
        let h = harness(model.clone());

        for i in 0..10 {
            let id = insert(&h.store, &format!("Article {}", i));
            h.queue.enqueue(id).unwrap();
        }

        let pool = WorkerPool::start(h.pipeline.clone(), h.queue.clone(), 2, CancellationToken::new());
        let stats = wait_for(&pool, 10).await;

        assert_eq!(stats.processed, 10);
        assert!(model.max_in_flight() <= 2);
        assert_eq!(model.max_in_flight(), 2);

        for article in h.store.list().unwrap() {
            assert!(article.embedded);
            assert!(article.summary.is_some());
        }

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_deleted_article_is_skipped() {
        let model = Arc::new(FakeModel::new(4));
        let h = harness(model.clone());

        let id = insert(&h.store, "Gone");
        h.store.delete(id).unwrap();
        h.queue.enqueue(id).unwrap();

        let pool = WorkerPool::start(h.pipeline.clone(), h.queue.clone(), 1, CancellationToken::new());
        let stats = wait_for(&pool, 1).await;

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.processed, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_pool() {
        let model = Arc::new(FakeModel::new(4).failing(crate::enrichment::Stage::Tags));
        let h = harness(model.clone());

        for i in 0..3 {
            h.queue.enqueue(insert(&h.store, &format!("F{}", i))).unwrap();
        }

        let pool = WorkerPool::start(h.pipeline.clone(), h.queue.clone(), 2, CancellationToken::new());
        let stats = wait_for(&pool, 3).await;

        assert_eq!(stats.failed, 3);
        assert_eq!(pool.active(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_jobs() {
        let model = Arc::new(FakeModel::new(4).hanging(crate::enrichment::Stage::Tags));
        let h = harness(model.clone());

        h.queue.enqueue(insert(&h.store, "Stuck")).unwrap();

        let pool = WorkerPool::start(h.pipeline.clone(), h.queue.clone(), 1, CancellationToken::new());
        while model.calls(crate::enrichment::Stage::Tags) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown should not wait for the hung provider call");
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_aborted_job_stops_its_pipeline_run() {
        let model = Arc::new(FakeModel::new(4).hanging(crate::enrichment::Stage::Tags));
        let h = harness(model.clone());
        let id = insert(&h.store, "Abandoned");

        // The token is never cancelled, so only the abort can stop the run
        let job = tokio::spawn(run_job(
            id,
            h.pipeline.clone(),
            Arc::new(Semaphore::new(1)),
            Arc::new(Counters::default()),
            CancellationToken::new(),
        ));
        while model.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        job.abort();
        assert!(job.await.unwrap_err().is_cancelled());

        for _ in 0..200 {
            if model.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(model.in_flight(), 0);
        assert!(h.store.get(id).unwrap().unwrap().tags.is_none());
    }
}
