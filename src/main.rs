use know::cli::{Cli, Commands, ConfigAction};
use know::config::{expand_tilde, Config};
use know::daemon::{Daemon, DaemonStatus, IpcClient, IpcMessage, IpcResponse, ProcessManager, StatusReport};
use know::error::{KnowError, Result};
use know::service::SearchHit;
use know::storage::{Article, ArticleEdit, NewArticle};
use know::tags::TagCount;
use std::io::Read;
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Start => cmd_start(cli.config)?,
        Commands::Run => cmd_run(cli.config)?,
        Commands::Stop => cmd_stop(cli.config)?,
        Commands::Status => cmd_status(cli.config)?,
        Commands::Add {
            title,
            content,
            file,
            category,
            author,
            tags,
        } => {
            let article = NewArticle {
                title,
                content: read_body(content, file)?,
                category,
                author,
                tags,
            };
            cmd_add(cli.config, article)?;
        }
        Commands::Edit {
            id,
            title,
            content,
            file,
            category,
            tags,
        } => {
            let edit = ArticleEdit {
                title,
                content: read_body(content, file)?,
                category,
                tags: (!tags.is_empty()).then_some(tags),
            };
            cmd_edit(cli.config, id, edit)?;
        }
        Commands::Delete { id } => {
            let response = request(cli.config, IpcMessage::Delete { id })?;
            print_message(response)?;
        }
        Commands::Show { id, json } => cmd_show(cli.config, id, json)?,
        Commands::Search { query, limit, json } => cmd_search(cli.config, query, limit, json)?,
        Commands::Tags { limit } => cmd_tags(cli.config, limit)?,
        Commands::Sweep { id } => cmd_sweep(cli.config, id)?,
        Commands::Seed { count } => cmd_seed(cli.config, count)?,
        Commands::Clear { yes } => cmd_clear(cli.config, yes)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "know=debug" } else { "know=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| KnowError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Send one request to the running daemon
fn request(config_path: Option<PathBuf>, message: IpcMessage) -> Result<IpcResponse> {
    let config = load_config(config_path)?;
    let client = IpcClient::new(expand_tilde(&config.daemon.socket_path));
    runtime()?.block_on(client.send(&message))
}

fn print_message(response: IpcResponse) -> Result<()> {
    let success = response.success;
    let message = response.message.unwrap_or_default();
    if success {
        println!("✓ {}", message);
        Ok(())
    } else {
        Err(KnowError::Daemon(message))
    }
}

fn read_body(content: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }
    if let Some(file) = file {
        return std::fs::read_to_string(&file).map_err(|e| KnowError::Io {
            source: e,
            context: format!("Failed to read {:?}", file),
        });
    }

    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .map_err(|e| KnowError::Io {
            source: e,
            context: "Failed to read article body from stdin".to_string(),
        })?;
    Ok(body)
}

fn cmd_start(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("✓ Starting know daemon...");
    println!("  Socket: {}", expand_tilde(&config.daemon.socket_path).display());
    println!("  Log: {}", expand_tilde(&config.daemon.log_file).display());

    // Forks: the parent exits inside, the child runs the daemon
    Daemon::start_background(config)
}

fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    runtime()?.block_on(async {
        let mut daemon = Daemon::new(config)?;
        daemon.run_foreground().await
    })
}

fn cmd_stop(config_path: Option<PathBuf>) -> Result<()> {
    use std::thread::sleep;
    use std::time::Duration;

    let config = load_config(config_path)?;
    let pm = ProcessManager::new(expand_tilde(&config.daemon.pid_file));

    match Daemon::stop(&config) {
        Ok(()) => println!("Sending SIGTERM to daemon..."),
        Err(KnowError::DaemonNotRunning) => {
            println!("Daemon is not running");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    for _ in 0..20 {
        sleep(Duration::from_millis(500));
        if !pm.is_running() {
            println!("✓ Daemon stopped gracefully");
            return Ok(());
        }
    }

    println!("Daemon not responding, sending SIGKILL...");
    pm.signal(nix::sys::signal::Signal::SIGKILL)?;
    sleep(Duration::from_millis(500));
    if pm.is_running() {
        println!("⚠ Warning: Daemon may still be running");
    } else {
        pm.release()?;
        println!("✓ Daemon force killed");
    }

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.clone())?;

    println!("Know Status");
    println!("===========");

    match Daemon::status(&config) {
        DaemonStatus::Running { pid } => match pid {
            Some(pid) => println!("\nDaemon: Running (PID: {})", pid),
            None => println!("\nDaemon: Running"),
        },
        DaemonStatus::Stopped => {
            println!("\nDaemon: Stopped");
            return Ok(());
        }
    }

    let report: StatusReport = request(config_path, IpcMessage::Status)?.into_data()?;
    println!("Provider: {}", report.provider);
    println!(
        "\nArticles: {} total, {} untagged, {} without summary, {} embedded",
        report.articles.article_count,
        report.articles.untagged_count,
        report.articles.unsummarized_count,
        report.articles.embedded_count
    );
    println!(
        "Queue: {} waiting, {}/{} workers busy",
        report.queued, report.active_jobs, report.workers
    );
    println!(
        "Jobs: {} processed, {} failed, {} skipped",
        report.jobs.processed, report.jobs.failed, report.jobs.skipped
    );
    if report.vector_index_enabled {
        println!("Vector index: enabled ({} dimensions)", report.vector_dim);
    } else {
        println!("Vector index: disabled");
    }
    println!("Tags: {} distinct", report.distinct_tags);

    Ok(())
}

fn cmd_add(config_path: Option<PathBuf>, article: NewArticle) -> Result<()> {
    let created: Article = request(config_path, IpcMessage::Create { article })?.into_data()?;
    println!("✓ Added article {} ({})", created.id, created.title);
    println!("  Tags, summary and embedding will be generated in the background");
    Ok(())
}

fn cmd_edit(config_path: Option<PathBuf>, id: i64, edit: ArticleEdit) -> Result<()> {
    let updated: Article = request(config_path, IpcMessage::Update { id, edit })?.into_data()?;
    println!("✓ Updated article {} ({})", updated.id, updated.title);
    Ok(())
}

fn cmd_show(config_path: Option<PathBuf>, id: i64, json: bool) -> Result<()> {
    let article: Article = request(config_path, IpcMessage::Get { id })?.into_data()?;

    if json {
        println!("{}", to_json(&article)?);
        return Ok(());
    }

    println!("#{} {}", article.id, article.title);
    println!("Created: {}", article.created_at.format("%Y-%m-%d %H:%M:%S"));
    if !article.category.is_empty() {
        println!("Category: {}", article.category);
    }
    match &article.tags {
        Some(tags) if !tags.is_empty() => println!("Tags: {}", tags.join(", ")),
        _ => println!("Tags: (pending)"),
    }
    println!(
        "Summary: {}",
        article.summary.as_deref().unwrap_or("(pending)")
    );
    println!("Embedded: {}", if article.embedded { "yes" } else { "no" });
    println!("\n{}", article.content);

    Ok(())
}

fn cmd_search(config_path: Option<PathBuf>, query: String, limit: usize, json: bool) -> Result<()> {
    let hits: Vec<SearchHit> =
        request(config_path, IpcMessage::Search { query, limit })?.into_data()?;

    if json {
        println!("{}", to_json(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No matching articles");
        return Ok(());
    }

    for hit in hits {
        println!(
            "{:>6}  {:.3}  {}",
            hit.article.id, hit.distance, hit.article.title
        );
        if let Some(summary) = &hit.article.summary {
            println!("        {}", summary);
        }
    }
    Ok(())
}

fn cmd_tags(config_path: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let tags: Vec<TagCount> = request(config_path, IpcMessage::Tags)?.into_data()?;

    if tags.is_empty() {
        println!("No tags yet");
        return Ok(());
    }

    for tag in tags.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{:>6}  {}", tag.count, tag.tag);
    }
    Ok(())
}

fn cmd_sweep(config_path: Option<PathBuf>, id: Option<i64>) -> Result<()> {
    match id {
        Some(id) => print_message(request(config_path, IpcMessage::Reprocess { id })?),
        None => {
            let queued: usize = request(config_path, IpcMessage::Sweep)?.into_data()?;
            println!("✓ Queued {} articles for enrichment", queued);
            Ok(())
        }
    }
}

fn cmd_seed(config_path: Option<PathBuf>, count: i64) -> Result<()> {
    println!("Fetching articles, this can take a while...");
    let created: usize = request(config_path, IpcMessage::Seed { count })?.into_data()?;
    println!("✓ Seeded {} articles; enrichment runs in the background", created);
    Ok(())
}

fn cmd_clear(config_path: Option<PathBuf>, yes: bool) -> Result<()> {
    if !yes {
        println!("This deletes every article. Type 'yes' to continue:");
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .map_err(|e| KnowError::Io {
                source: e,
                context: "Failed to read confirmation".to_string(),
            })?;
        if answer.trim() != "yes" {
            println!("Aborted");
            return Ok(());
        }
    }

    let removed: usize = request(config_path, IpcMessage::Clear)?.into_data()?;
    println!("✓ Removed {} articles", removed);
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| KnowError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file not found, using defaults. Run 'know config init' to create one.");
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| KnowError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}
