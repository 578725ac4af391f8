// Daemon module: background enrichment service and its control socket

mod ipc;
mod process;
mod queue;
mod signals;
mod worker;

pub use ipc::{IpcClient, IpcMessage, IpcResponse, IpcServer};
pub use process::ProcessManager;
pub use queue::EnrichmentQueue;
pub use signals::{DaemonSignal, SignalHandler};
pub use worker::{WorkerPool, WorkerStats};

use crate::config::{expand_tilde, Config};
use crate::enrichment::{
    Embedder, EnrichmentPipeline, FastEmbedder, GeminiClient, LanguageModel, LocalEmbeddingModel,
};
use crate::error::{KnowError, Result};
use crate::service::{ArticleService, DatasetSeeder};
use crate::storage::{DbStats, StorageManager};
use crate::tags::TagFrequencyCache;
use crate::vector::VectorIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Snapshot reported by the `status` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub pid: u32,
    pub provider: String,
    pub articles: DbStats,
    pub queued: usize,
    pub active_jobs: usize,
    pub workers: usize,
    pub jobs: WorkerStats,
    pub vector_index_enabled: bool,
    pub vector_dim: usize,
    pub distinct_tags: usize,
}

/// Shared state handed to every client connection
struct RequestContext {
    service: Arc<ArticleService>,
    seeder: Arc<DatasetSeeder>,
    storage: Arc<StorageManager>,
    queue: Arc<EnrichmentQueue>,
    index: Arc<VectorIndex>,
    tags: Arc<TagFrequencyCache>,
    pool: Arc<WorkerPool>,
    provider: String,
    shutdown: CancellationToken,
}

/// Owns every long-lived component of the running service
pub struct Daemon {
    config: Config,
    process_manager: ProcessManager,
    storage: Arc<StorageManager>,
    tags: Arc<TagFrequencyCache>,
    index: Arc<VectorIndex>,
    queue: Arc<EnrichmentQueue>,
    model: Arc<dyn LanguageModel>,
    service: Arc<ArticleService>,
    seeder: Arc<DatasetSeeder>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Build a daemon backed by the configured language model provider
    pub fn new(config: Config) -> Result<Self> {
        let remote: Arc<dyn LanguageModel> = Arc::new(GeminiClient::from_config(
            &config.llm,
            config.indexing.vector_dim,
            config.enrichment.call_timeout(),
        )?);

        let model: Arc<dyn LanguageModel> = match config.llm.embedding_provider.as_str() {
            "fastembed" => {
                let embedder = FastEmbedder::new(&config.llm.local_embedding_model)?;
                if embedder.dimension() != config.indexing.vector_dim {
                    return Err(KnowError::InvalidDimension {
                        expected: config.indexing.vector_dim,
                        actual: embedder.dimension(),
                    });
                }
                Arc::new(LocalEmbeddingModel::new(remote, Arc::new(embedder)))
            }
            _ => remote,
        };

        Self::with_model(config, model)
    }

    /// Build a daemon around an explicit language model
    pub fn with_model(config: Config, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let data_dir = expand_tilde(&config.storage.data_dir);
        let storage = Arc::new(StorageManager::new(data_dir)?);

        let tags = Arc::new(TagFrequencyCache::new());
        tags.initialize(storage.articles.as_ref())?;

        let index = Arc::new(VectorIndex::open(
            storage.database.clone(),
            &config.indexing,
        ));
        let queue = Arc::new(EnrichmentQueue::new());

        let service = Arc::new(ArticleService::new(
            storage.articles.clone(),
            index.clone(),
            tags.clone(),
            queue.clone(),
            model.clone(),
            config.enrichment.call_timeout(),
        ));

        let seeder = Arc::new(DatasetSeeder::new(config.enrichment.call_timeout())?);
        let process_manager = ProcessManager::new(expand_tilde(&config.daemon.pid_file));

        Ok(Self {
            config,
            process_manager,
            storage,
            tags,
            index,
            queue,
            model,
            service,
            seeder,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the daemon when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run in the current process until a signal or a `stop` request arrives
    pub async fn run_foreground(&mut self) -> Result<()> {
        self.process_manager.acquire()?;
        tracing::info!("Daemon starting in foreground mode");

        let result = self.serve().await;

        if let Err(e) = self.process_manager.release() {
            tracing::error!("Failed to cleanup on exit: {}", e);
        }
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;

        let socket_path = expand_tilde(&self.config.daemon.socket_path);
        let mut ipc_server = IpcServer::new(socket_path);
        ipc_server.bind().await?;

        let pipeline = Arc::new(EnrichmentPipeline::new(
            self.model.clone(),
            self.storage.articles.clone(),
            self.index.clone(),
            self.tags.clone(),
            self.config.enrichment.call_timeout(),
        ));
        let pool = Arc::new(WorkerPool::start(
            pipeline,
            self.queue.clone(),
            self.config.enrichment.workers,
            self.shutdown.child_token(),
        ));

        let context = Arc::new(RequestContext {
            service: self.service.clone(),
            seeder: self.seeder.clone(),
            storage: self.storage.clone(),
            queue: self.queue.clone(),
            index: self.index.clone(),
            tags: self.tags.clone(),
            pool: pool.clone(),
            provider: self.model.name().to_string(),
            shutdown: self.shutdown.clone(),
        });
        let connections = Arc::new(Semaphore::new(self.config.daemon.max_connections.max(1)));
        let read_timeout = self.config.daemon.read_timeout();

        tracing::info!(
            "Daemon started successfully (provider: {}, workers: {})",
            context.provider,
            pool.concurrency()
        );

        loop {
            tokio::select! {
                accepted = ipc_server.accept() => match accepted {
                    Ok(stream) => match connections.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let context = context.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_client(stream, &context, read_timeout).await {
                                    tracing::error!("Client handler error: {}", e);
                                }
                            });
                        }
                        Err(_) => {
                            tracing::warn!("Connection limit reached, rejecting client");
                            tokio::spawn(reject_client(stream, read_timeout));
                        }
                    },
                    Err(e) => tracing::warn!("Failed to accept IPC connection: {}", e),
                },

                sig = signal_handler.wait() => {
                    tracing::info!("Shutdown signal received ({})", sig);
                    break;
                }

                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested over IPC");
                    break;
                }
            }
        }

        tracing::info!("Shutting down daemon");
        self.shutdown.cancel();
        self.queue.close();
        pool.shutdown().await;
        ipc_server.shutdown()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }

    /// Fork into the background and run there
    ///
    /// Storage and the provider client are created after the fork, in the child.
    pub fn start_background(config: Config) -> Result<()> {
        let process_manager = ProcessManager::new(expand_tilde(&config.daemon.pid_file));
        if process_manager.is_running() {
            return Err(KnowError::Daemon("Daemon is already running".to_string()));
        }

        let log_file = expand_tilde(&config.daemon.log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KnowError::Io {
                source: e,
                context: format!("Failed to create log directory: {:?}", parent),
            })?;
        }

        let open_log = |extension: &str| {
            let path = log_file.with_extension(extension);
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| KnowError::Io {
                    source: e,
                    context: format!("Failed to open log file: {:?}", path),
                })
        };

        let working_directory = std::env::current_dir().map_err(|e| KnowError::Io {
            source: e,
            context: "Failed to get current directory".to_string(),
        })?;

        daemonize::Daemonize::new()
            .working_directory(working_directory)
            .stdout(open_log("stdout")?)
            .stderr(open_log("stderr")?)
            .start()
            .map_err(|e| KnowError::Daemon(format!("Failed to daemonize: {}", e)))?;

        let runtime = tokio::runtime::Runtime::new().map_err(|e| KnowError::Io {
            source: e,
            context: "Failed to create tokio runtime".to_string(),
        })?;
        runtime.block_on(async {
            let mut daemon = Daemon::new(config)?;
            daemon.run_foreground().await
        })
    }

    /// Ask a running daemon to stop
    pub fn stop(config: &Config) -> Result<()> {
        let process_manager = ProcessManager::new(expand_tilde(&config.daemon.pid_file));
        if !process_manager.is_running() {
            return Err(KnowError::DaemonNotRunning);
        }

        process_manager.signal(nix::sys::signal::Signal::SIGTERM)?;
        tracing::info!("Sent shutdown signal to daemon");
        Ok(())
    }

    /// Whether a daemon process is alive, and its pid
    pub fn status(config: &Config) -> DaemonStatus {
        let process_manager = ProcessManager::new(expand_tilde(&config.daemon.pid_file));
        if process_manager.is_running() {
            DaemonStatus::Running {
                pid: process_manager.read_pid().ok(),
            }
        } else {
            DaemonStatus::Stopped
        }
    }
}

async fn handle_client(
    mut stream: tokio::net::UnixStream,
    context: &RequestContext,
    read_timeout: Duration,
) -> Result<()> {
    let message = tokio::time::timeout(read_timeout, ipc::read_message(&mut stream))
        .await
        .map_err(|_| KnowError::Timeout {
            operation: "read request",
            timeout: read_timeout,
        })??;
    let response = dispatch(message, context).await;
    ipc::write_response(&mut stream, &response).await
}

/// Answer a connection over the limit with an error instead of serving it
///
/// The request is drained first (bounded by the read timeout) so the client
/// never writes into a closed socket.
async fn reject_client(mut stream: tokio::net::UnixStream, read_timeout: Duration) {
    let _ = tokio::time::timeout(read_timeout, ipc::read_message(&mut stream)).await;

    let response = IpcResponse::error("Too many connections, try again later");
    if let Err(e) = ipc::write_response(&mut stream, &response).await {
        tracing::debug!("Failed to reject client: {}", e);
    }
}

fn respond<T: Serialize>(result: Result<T>) -> IpcResponse {
    match result {
        Ok(value) => IpcResponse::with_data(&value),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

async fn dispatch(message: IpcMessage, context: &RequestContext) -> IpcResponse {
    let service = &context.service;

    match message {
        IpcMessage::Create { article } => respond(service.create(&article)),
        IpcMessage::Update { id, edit } => respond(service.update(id, &edit)),
        IpcMessage::Delete { id } => match service.delete(id) {
            Ok(true) => IpcResponse::success(format!("Deleted article {}", id)),
            Ok(false) => IpcResponse::error(KnowError::ArticleNotFound { id }.to_string()),
            Err(e) => IpcResponse::error(e.to_string()),
        },
        IpcMessage::Get { id } => respond(
            service
                .get(id)
                .and_then(|a| a.ok_or(KnowError::ArticleNotFound { id })),
        ),
        IpcMessage::Search { query, limit } => respond(service.search(&query, limit).await),
        IpcMessage::Tags => IpcResponse::with_data(&service.popular_tags()),
        IpcMessage::Sweep => respond(service.sweep()),
        IpcMessage::Reprocess { id } => match service.reprocess(id) {
            Ok(()) => IpcResponse::success(format!("Article {} queued", id)),
            Err(e) => IpcResponse::error(e.to_string()),
        },
        IpcMessage::Seed { count } => respond(context.seeder.seed(service, count).await),
        IpcMessage::Clear => respond(service.clear_all()),
        IpcMessage::Status => respond(status_report(context)),
        IpcMessage::Stop => {
            context.shutdown.cancel();
            IpcResponse::success("Shutdown initiated")
        }
    }
}

fn status_report(context: &RequestContext) -> Result<StatusReport> {
    Ok(StatusReport {
        pid: std::process::id(),
        provider: context.provider.clone(),
        articles: context.storage.database.stats()?,
        queued: context.queue.len(),
        active_jobs: context.pool.active(),
        workers: context.pool.concurrency(),
        jobs: context.pool.stats(),
        vector_index_enabled: context.index.is_enabled(),
        vector_dim: context.index.dimension(),
        distinct_tags: context.tags.len(),
    })
}

/// Daemon status
#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: Option<i32> },
    Stopped,
}
