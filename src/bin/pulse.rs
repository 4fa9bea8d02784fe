//! pulse CLI: runs scheduled checks through the serialized queue.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pulse_rs::checks::{CheckRegistry, HookWorker};
use pulse_rs::config::Config;
use pulse_rs::model::{CheckAlert, WorkItem};
use pulse_rs::queue::Queue;
use pulse_rs::scheduler::{Schedule, Scheduler};
use pulse_rs::telemetry::metrics::{QueueMetrics, SchedulerMetrics};
use pulse_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pulse", about = "Scheduled client health checks, one at a time")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and queue until Ctrl-C
    Serve {
        /// Directory containing check TOML files
        #[arg(long, default_value = "checks")]
        checks: PathBuf,
        /// Hook command run once per check
        #[arg(long)]
        hook: PathBuf,
        /// Hook timeout in seconds
        #[arg(long, default_value_t = 300)]
        hook_timeout: u64,
        /// Extra arguments passed to the hook
        #[arg(last = true)]
        hook_args: Vec<String>,
    },
    /// Check registry operations
    Checks {
        #[command(subcommand)]
        action: ChecksAction,
    },
    /// Cron expression helpers
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
enum ChecksAction {
    /// List loaded checks and their next run
    List {
        #[arg(long, default_value = "checks")]
        checks: PathBuf,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// Validate an expression and print upcoming ticks
    Next {
        expr: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            checks,
            hook,
            hook_timeout,
            hook_args,
        } => cmd_serve(checks, hook, hook_timeout, hook_args).await,
        Command::Checks {
            action: ChecksAction::List { checks },
        } => cmd_checks_list(checks),
        Command::Cron {
            action: CronAction::Next { expr, count },
        } => cmd_cron_next(&expr, count),
    }
}

async fn cmd_serve(
    checks: PathBuf,
    hook: PathBuf,
    hook_timeout: u64,
    hook_args: Vec<String>,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "pulse"))?;

    let registry = CheckRegistry::load_from_dir(&checks)
        .with_context(|| format!("loading checks from {}", checks.display()))?;
    let queue_config = config.queue_config();

    let worker = Arc::new(
        HookWorker::new(hook)
            .args(hook_args)
            .webhook_url(config.webhook_url)
            .timeout(std::time::Duration::from_secs(hook_timeout)),
    );

    let queue: Queue<CheckAlert> = Queue::new(
        move |cancel, alert| {
            let worker = Arc::clone(&worker);
            async move { worker.run(cancel, alert).await }
        },
        QueueMetrics::new(&queue_config.namespace),
        &queue_config,
    );

    let cancel = CancellationToken::new();
    let consumer = queue.start(cancel.clone())?;

    let scheduler = Scheduler::new(&cancel, SchedulerMetrics::new(&queue_config.namespace));
    for check in registry.enabled() {
        let queue = queue.clone();
        let alert = check.clone();
        scheduler.add_job(format!("check-{}", check.key()), &check.schedule, move |_| {
            let outcome = queue.enqueue(alert.clone());
            debug!(key = %alert.key(), ?outcome, "scheduled check enqueued");
            async move { anyhow::Ok(()) }
        })?;
    }

    info!(
        checks = registry.len(),
        scheduled = scheduler.job_names().len(),
        capacity = queue_config.capacity,
        "pulse serving"
    );

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    cancel.cancel();
    scheduler.stop();
    consumer.await.ok();

    let stats = queue.stats();
    info!(
        processed = stats.processed(),
        skipped = stats.skipped,
        dropped = stats.dropped,
        "queue drained"
    );
    Ok(())
}

fn cmd_checks_list(checks: PathBuf) -> anyhow::Result<()> {
    let registry = CheckRegistry::load_from_dir(&checks)?;

    if registry.is_empty() {
        println!("No checks found.");
        return Ok(());
    }

    println!(
        "{:<30}  {:<16}  {:<8}  NEXT RUN",
        "KEY", "SCHEDULE", "ENABLED"
    );
    println!("{}", "-".repeat(80));

    let now = Utc::now();
    for check in registry.iter() {
        let next = Schedule::parse(&check.schedule)?
            .next_after(&now)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<30}  {:<16}  {:<8}  {}",
            check.key(),
            check.schedule,
            check.enabled,
            if check.enabled { next.as_str() } else { "-" }
        );
    }

    println!("\n{} check(s)", registry.len());
    Ok(())
}

fn cmd_cron_next(expr: &str, count: usize) -> anyhow::Result<()> {
    let schedule = Schedule::parse(expr)?;
    for time in schedule.upcoming(&Utc::now(), count) {
        println!("{}", time.to_rfc3339());
    }
    Ok(())
}
