//! TalentForge daemon: runs the worker, reaper, dispatch planning, and
//! log pruning loops against the SQLite store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use uuid::Uuid;

use talentforge_config::defaults::{
    DEFAULT_CLAIM_LIMIT, DEFAULT_DISPATCH_INTERVAL_SECONDS, DEFAULT_LEASE_SECONDS,
    DEFAULT_LOG_LEVEL, DEFAULT_LOG_RETENTION_DAYS, DEFAULT_REAPER_INTERVAL_SECONDS,
    DEFAULT_TICK_SECONDS,
};
use talentforge_config::schema::RetryConfig;
use talentforge_config::{config_dir, config_file_path, database_path, load_and_prepare, TalentForgeConfig};
use talentforge_core::{Clock, LogStore, PipelineStore, ScheduledTask, SystemClock};
use talentforge_pipeline::{dispatch_task_type, PipelineDispatcher};
use talentforge_scheduler::{
    run_reaper_loop, run_worker_loop, ExecutionOutcome, ExecutorRegistry, LeaseReaper,
    RetryPolicy, TaskExecutor, TaskScheduler,
};
use talentforge_store::SqliteStore;

/// Items considered per pipeline per dispatch planning pass.
const DISPATCH_BATCH: usize = 50;

/// How often the log pruning loop runs.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "talentforge")]
#[command(about = "TalentForge — recurring task scheduler and dispatch pipeline")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to <config dir>/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon
    Serve,
    /// Print task and pipeline queue counts as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));
    let config = load_and_prepare(&config_path).await?;

    init_tracing(&config);

    match cli.command {
        Commands::Serve => run_daemon(config).await?,
        Commands::Status => print_status(&config).await?,
    }

    Ok(())
}

fn init_tracing(config: &TalentForgeConfig) {
    let level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let json = config
        .logging
        .as_ref()
        .and_then(|l| l.json)
        .unwrap_or(false);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_daemon(config: TalentForgeConfig) -> Result<()> {
    let db_path = database_path(&config);
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sched = config.scheduler.clone().unwrap_or_default();
    let tick = Duration::from_secs(sched.tick_seconds.unwrap_or(DEFAULT_TICK_SECONDS));
    let claim_limit = sched.claim_limit.unwrap_or(DEFAULT_CLAIM_LIMIT);
    let lease = chrono::Duration::seconds(
        sched.lease_seconds.unwrap_or(DEFAULT_LEASE_SECONDS) as i64
    );
    let reaper_tick = Duration::from_secs(
        sched
            .reaper_interval_seconds
            .unwrap_or(DEFAULT_REAPER_INTERVAL_SECONDS),
    );
    let retention_days = sched.log_retention_days.unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    let dispatch_tick = Duration::from_secs(
        config
            .pipeline
            .as_ref()
            .and_then(|p| p.dispatch_interval_seconds)
            .unwrap_or(DEFAULT_DISPATCH_INTERVAL_SECONDS),
    );

    let scheduler = Arc::new(TaskScheduler::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        lease,
        retry_policy(sched.retry.as_ref()),
    ));
    let reaper = Arc::new(LeaseReaper::new(store.clone(), store.clone(), clock.clone()));
    let dispatcher = Arc::new(PipelineDispatcher::new(
        store.clone(),
        scheduler.clone(),
        clock.clone(),
    ));

    // Embedding applications register their own executors; standalone
    // serve gets a logging executor per configured pipeline so dispatch
    // tasks complete instead of piling up as unknown types.
    let mut registry = ExecutorRegistry::new();
    for settings in store.list_settings().await? {
        let task_type = dispatch_task_type(&settings.pipeline_type);
        registry.register(
            task_type.clone(),
            Arc::new(LoggingDispatchExecutor {
                dispatcher: dispatcher.clone(),
            }),
        );
        info!(task_type = %task_type, "Registered pipeline dispatch executor");
    }
    let registry = Arc::new(registry);

    info!(
        db = %db_path.display(),
        tick_secs = tick.as_secs(),
        claim_limit,
        "TalentForge daemon starting"
    );

    tokio::spawn(run_worker_loop(scheduler.clone(), registry, tick, claim_limit));
    tokio::spawn(run_reaper_loop(reaper, reaper_tick));
    tokio::spawn(run_dispatch_loop(store.clone(), dispatcher, dispatch_tick));
    tokio::spawn(run_log_prune_loop(store, clock, retention_days));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    Ok(())
}

fn retry_policy(cfg: Option<&RetryConfig>) -> RetryPolicy {
    let base = RetryPolicy::default();
    let Some(cfg) = cfg else { return base };
    RetryPolicy {
        max_attempts: cfg.max_attempts.unwrap_or(base.max_attempts),
        base_delay_secs: cfg.base_delay_seconds.unwrap_or(base.base_delay_secs),
        backoff_factor: cfg.backoff_factor.unwrap_or(base.backoff_factor),
        max_delay_secs: cfg.max_delay_seconds.unwrap_or(base.max_delay_secs),
        jitter: base.jitter,
    }
}

/// Plans dispatch slots for every enabled pipeline on a fixed interval.
async fn run_dispatch_loop(
    store: Arc<SqliteStore>,
    dispatcher: Arc<PipelineDispatcher>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let settings = match store.list_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                error!(error = %err, "Failed to list pipeline settings");
                continue;
            }
        };
        for s in settings.into_iter().filter(|s| s.enabled) {
            if let Err(err) = dispatcher
                .dispatch_pending(&s.pipeline_type, s.platform.as_deref(), DISPATCH_BATCH)
                .await
            {
                error!(
                    pipeline_type = %s.pipeline_type,
                    error = %err,
                    "Dispatch planning failed"
                );
            }
        }
    }
}

/// Deletes scheduler log rows older than the retention window.
async fn run_log_prune_loop(logs: Arc<SqliteStore>, clock: Arc<dyn Clock>, retention_days: u32) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let cutoff = clock.now() - chrono::Duration::days(retention_days as i64);
        match logs.prune_older_than(cutoff).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Pruned old scheduler logs"),
            Err(err) => error!(error = %err, "Log prune failed"),
        }
    }
}

/// Marks dispatch items posted and logs what would have gone out.
struct LoggingDispatchExecutor {
    dispatcher: Arc<PipelineDispatcher>,
}

#[async_trait]
impl TaskExecutor for LoggingDispatchExecutor {
    async fn execute(&self, task: &ScheduledTask) -> ExecutionOutcome {
        let Some(item_id) = task
            .config
            .data
            .get("itemId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return ExecutionOutcome::Failed {
                error: "dispatch payload missing itemId".to_string(),
            };
        };

        info!(
            task_id = %task.id,
            item_id = %item_id,
            task_type = %task.task_type,
            "Dispatching pipeline item"
        );

        match self
            .dispatcher
            .mark_posted(item_id, Some("dispatched".to_string()))
            .await
        {
            Ok(()) => ExecutionOutcome::Completed {
                result: Some(format!("item {item_id} dispatched")),
            },
            Err(err) => ExecutionOutcome::Failed {
                error: err.to_string(),
            },
        }
    }
}

async fn print_status(config: &TalentForgeConfig) -> Result<()> {
    let db_path = database_path(config);
    let store = SqliteStore::open(&db_path)?;
    let counts = store.status_counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
