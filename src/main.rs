//! Harvest main entry point
//!
//! This is the command-line interface for the Harvest crawl orchestration engine.

use clap::{Parser, Subcommand};
use harvest_engine::cache::{spawn_sweeper, CacheStore, MemoryCache};
use harvest_engine::config::{load_config_with_hash, Config};
use harvest_engine::crawler::{ExecutionMode, HttpFetcher};
use harvest_engine::jobs::{JobServices, JobState, ManagerSettings, TaskManager};
use harvest_engine::notify::{LogNotifier, NotificationSink, WebhookNotifier};
use harvest_engine::output::{load_statistics, print_statistics, write_markdown_summary};
use harvest_engine::scheduler::Scheduler;
use harvest_engine::source::{ConfiguredSource, WorkSource};
use harvest_engine::storage::{open_storage, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Harvest: a crawl orchestration engine
///
/// Harvest runs crawl jobs against configured sources, deduplicates the
/// results by fingerprint and stores new items in SQLite. Jobs can be started
/// by hand or fired on a daily or fixed-interval schedule.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(version = "1.0.0")]
#[command(about = "A crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one job and wait for it to finish
    Run {
        /// Job kind to run; defaults to the scheduler's default kind
        #[arg(long)]
        kind: Option<String>,

        /// Execution mode (async, threaded, serial)
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Write a markdown summary of the job to this path
        #[arg(long, value_name = "PATH")]
        summary: Option<PathBuf>,
    },

    /// Fire the default job on its configured cadence until interrupted
    Schedule,

    /// Validate the config and enumerate every source without crawling
    Check,

    /// Print the failed-item ledger
    Failures {
        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run {
            kind,
            mode,
            summary,
        } => handle_run(config, kind, mode, summary).await,
        Command::Schedule => handle_schedule(config).await,
        Command::Check => handle_check(&config).await,
        Command::Failures { kind, limit } => handle_failures(&config, kind.as_deref(), limit),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvest_engine=info,harvest=info,warn"),
            1 => EnvFilter::new("harvest_engine=debug,harvest=debug,info"),
            2 => EnvFilter::new("harvest_engine=trace,harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Shared pieces of a running engine
struct Engine {
    manager: TaskManager,
    store: Arc<SqliteStore>,
    shutdown: CancellationToken,
}

fn build_source(
    config: &Config,
    fetcher: Arc<HttpFetcher>,
    cache: Arc<dyn CacheStore>,
) -> ConfiguredSource {
    ConfiguredSource::new(
        config.sources.clone(),
        fetcher,
        cache,
        Duration::from_secs(config.cache.response_ttl_secs),
    )
}

fn build_engine(config: &Config) -> Result<Engine, Box<dyn std::error::Error>> {
    let store = Arc::new(open_storage(Path::new(&config.output.database_path))?);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(config.cache.capacity));
    let fetcher = Arc::new(HttpFetcher::from_config(&config.engine, &config.user_agent)?);
    let shutdown = CancellationToken::new();

    if let Some(secs) = config.cache.sweep_interval_secs {
        spawn_sweeper(cache.clone(), Duration::from_secs(secs), shutdown.clone());
    }

    let notifier: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => {
            tracing::info!("Delivering job events to {}", url);
            Arc::new(WebhookNotifier::new(url)?)
        }
        None => Arc::new(LogNotifier),
    };

    let services = JobServices {
        source: Arc::new(build_source(config, fetcher.clone(), cache.clone())),
        fetcher,
        cache,
        store: store.clone(),
        notifier,
    };

    Ok(Engine {
        manager: TaskManager::new(services, ManagerSettings::from_config(config)),
        store,
        shutdown,
    })
}

/// Handles `run`: enqueues one job and waits for its terminal state
async fn handle_run(
    config: Config,
    kind: Option<String>,
    mode: Option<ExecutionMode>,
    summary: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(&config)?;
    let kind = kind.unwrap_or_else(|| config.scheduler.default_kind.clone());

    let job_id = engine.manager.enqueue(&kind, mode)?;

    let manager = engine.manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling job {}", job_id);
            let _ = manager.cancel(job_id);
        }
    });

    let job = engine.manager.wait(job_id).await?;
    engine.shutdown.cancel();

    println!("Job {} ({}): {}", job.id, job.kind, job.state);
    println!(
        "  {} processed of {}: {} saved, {} skipped, {} failed",
        job.processed, job.total, job.succeeded, job.skipped, job.failed
    );
    if let Some(error) = &job.error_summary {
        println!("  {}", error);
    }
    println!(
        "  {} items stored for '{}'",
        engine.store.count_items(Some(&job.kind))?,
        job.kind
    );

    if let Some(path) = summary {
        write_markdown_summary(std::slice::from_ref(&job), &path)?;
        println!("✓ Summary written to: {}", path.display());
    }

    if job.state == JobState::Failed {
        return Err(format!("job {} failed", job.id).into());
    }
    Ok(())
}

/// Handles `schedule`: runs the scheduler until Ctrl-C
async fn handle_schedule(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if !config.scheduler.enabled {
        tracing::error!(
            "Scheduler is disabled in the configuration; set enabled = true under [scheduler]"
        );
        return Err("scheduler is disabled".into());
    }

    let engine = build_engine(&config)?;

    let scheduler = Scheduler::from_config(
        Arc::new(engine.manager.clone()),
        engine.store.clone(),
        &config.scheduler,
    )?;

    let stop = engine.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            stop.cancel();
        }
    });

    scheduler.run(engine.shutdown.clone()).await;

    engine.manager.cancel_all();
    for job in engine.manager.list() {
        if !job.state.is_terminal() {
            engine.manager.wait(job.id).await?;
        }
    }

    Ok(())
}

/// Handles `check`: validates config and shows what each source would yield
async fn handle_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Harvest Check ===\n");

    println!("Engine:");
    println!("  Concurrency: {}", config.engine.concurrency);
    println!("  Default mode: {}", config.engine.default_mode);
    println!(
        "  Delay: {}-{}ms (slow: {}-{}ms after {} failures)",
        config.engine.delay_min_ms,
        config.engine.delay_max_ms,
        config.engine.slow_delay_min_ms,
        config.engine.slow_delay_max_ms,
        config.engine.slow_after
    );
    println!(
        "  Retries: {} attempts, backoff {}ms..{}ms",
        config.engine.max_attempts, config.engine.backoff_base_ms, config.engine.backoff_ceiling_ms
    );
    if let Some(proxy) = &config.engine.proxy {
        println!("  Proxy: {}", proxy);
    }

    println!("\nScheduler:");
    println!("  Enabled: {}", config.scheduler.enabled);
    println!("  Default kind: {}", config.scheduler.default_kind);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(config.cache.capacity));
    let fetcher = Arc::new(HttpFetcher::from_config(&config.engine, &config.user_agent)?);
    let source = build_source(config, fetcher, cache);

    println!("\nSources ({}):", config.sources.len());
    for entry in &config.sources {
        match source.enumerate(&entry.kind).await {
            Ok(items) => println!("  - {}: {} work items", entry.kind, items.len()),
            Err(e) => println!("  - {}: {}", entry.kind, e),
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles `failures`: prints the failed-item ledger
fn handle_failures(
    config: &Config,
    kind: Option<&str>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, kind, limit)?;
    print_statistics(&stats);

    Ok(())
}
