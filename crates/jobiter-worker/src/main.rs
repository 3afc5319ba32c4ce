//! jobiter worker daemon
//!
//! Runs interruptible jobs from a queue persisted to a JSON file. Stopping
//! the worker with Ctrl-C checkpoints the running job and writes it back to
//! the queue file, so the next `work` resumes where it left off.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobiter_core::{BoxError, Cursor, JobPayload, JsonCodec};
use jobiter_worker::{
    sources, CheckContext, InMemoryQueue, InterruptionContext, IterationConfig, IterationJob,
    IterationRunner, JobRegistry, QueueSnapshot, RunContext, Sequence, ShutdownSignal, Transport,
    Worker,
};

const COUNT_JOB: &str = "CountJob";

/// jobiter worker - interruptible iteration jobs
#[derive(Parser)]
#[command(name = "jobiter-worker")]
#[command(about = "Run interruptible iteration jobs from a file-backed queue")]
#[command(version)]
struct Cli {
    /// Queue file
    #[arg(short, long, default_value = "jobiter-queue.json")]
    queue_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a counting job
    Enqueue {
        /// Number of items to count through
        #[arg(short, long, default_value = "100")]
        count: u64,

        /// Simulated work per item in milliseconds
        #[arg(short, long, default_value = "100")]
        delay_ms: u64,

        /// Stop the job once this item is reached
        #[arg(long)]
        stop_at: Option<u64>,
    },

    /// Work off the queue until it is empty or the worker is interrupted
    Work {
        /// Maximum seconds per run before checkpointing
        #[arg(long)]
        max_run_secs: Option<u64>,

        /// Shutdown sampling interval in milliseconds
        #[arg(long)]
        check_throttle_ms: Option<u64>,
    },

    /// Show pending jobs and recorded failures
    Status,
}

/// Counts through `0..count`, sleeping per item.
struct CountJob {
    count: u64,
    delay: Duration,
    stop_at: Option<u64>,
}

impl CountJob {
    fn from_arguments(args: &[Value]) -> Result<Self, BoxError> {
        let options = args.first().ok_or("missing job options")?;
        let count = options
            .get("count")
            .and_then(Value::as_u64)
            .ok_or("missing 'count' option")?;
        let delay_ms = options.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        let stop_at = options.get("stop_at").and_then(Value::as_u64);

        Ok(Self {
            count,
            delay: Duration::from_millis(delay_ms),
            stop_at,
        })
    }
}

#[async_trait]
impl IterationJob for CountJob {
    type Item = u64;

    fn build_sequence(&self, cursor: Option<&Cursor>) -> Result<Sequence<'_, u64>, BoxError> {
        sources::times(self.count, cursor)
    }

    async fn each_iteration(&self, item: &u64, ctx: &RunContext) -> Result<(), BoxError> {
        tokio::time::sleep(self.delay).await;
        info!(job_id = %ctx.job_id, item, "Counted");
        Ok(())
    }

    fn should_stop(&self, item: &u64, _ctx: &CheckContext<'_>) -> bool {
        self.stop_at.is_some_and(|stop| *item >= stop)
    }

    fn on_start(&self, ctx: &RunContext) {
        info!(job_id = %ctx.job_id, count = self.count, "Counting started");
    }

    fn on_resume(&self, ctx: &RunContext) {
        info!(
            job_id = %ctx.job_id,
            times_interrupted = ctx.times_interrupted,
            resumed_from = ?ctx.resumed_from,
            "Counting resumed"
        );
    }

    fn on_complete(&self, ctx: &RunContext) {
        info!(job_id = %ctx.job_id, "Counting complete");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let queue = load_queue(&cli.queue_file)?;

    match cli.command {
        Commands::Enqueue {
            count,
            delay_ms,
            stop_at,
        } => {
            let payload = JobPayload::new(
                COUNT_JOB,
                vec![json!({ "count": count, "delay_ms": delay_ms, "stop_at": stop_at })],
            );
            queue.enqueue(&payload).await?;
            info!(job_id = %payload.job_id, count, "Enqueued counting job");
        }
        Commands::Work {
            max_run_secs,
            check_throttle_ms,
        } => {
            let mut config = IterationConfig::from_env()?;
            if let Some(secs) = max_run_secs {
                config = config.with_max_run_duration(Duration::from_secs(secs));
            }
            if let Some(ms) = check_throttle_ms {
                config = config.with_check_throttle(Duration::from_millis(ms));
            }

            info!(
                queue_file = %cli.queue_file.display(),
                max_run_secs = config.max_run_duration.as_secs(),
                "Starting jobiter worker"
            );

            let shutdown = ShutdownSignal::new();
            let context = InterruptionContext::with_system_clock(Arc::new(shutdown.clone()), config);
            let runner = IterationRunner::new(Arc::new(JsonCodec), context);
            let registry = JobRegistry::new().with_job(COUNT_JOB, CountJob::from_arguments);

            let worker = Worker::new(Arc::new(queue.clone()), registry, runner, shutdown);
            let signals = worker.start();
            let stats = worker.work_off().await?;
            if let Some(handle) = signals {
                handle.abort();
            }

            info!(%stats, "Worker stopped");
        }
        Commands::Status => {
            let snapshot = queue.snapshot().await?;
            println!("{} pending, {} failed", snapshot.pending.len(), snapshot.failures.len());
            for payload in &snapshot.pending {
                println!(
                    "  {} {} interrupted={} cursor={}",
                    payload.job_id,
                    payload.job_class,
                    payload.times_interrupted,
                    payload
                        .cursor_position
                        .as_ref()
                        .map_or_else(|| "-".to_string(), Cursor::to_string),
                );
            }
            for failure in &snapshot.failures {
                println!(
                    "  {} {}: {}",
                    failure.payload.job_id, failure.error_class, failure.message
                );
            }
            return Ok(());
        }
    }

    save_queue(&cli.queue_file, &queue).await?;
    Ok(())
}

fn load_queue(path: &Path) -> Result<InMemoryQueue, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(InMemoryQueue::new());
    }
    let snapshot: QueueSnapshot = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(InMemoryQueue::restore(snapshot)?)
}

async fn save_queue(path: &Path, queue: &InMemoryQueue) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = queue.snapshot().await?;
    std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
    Ok(())
}
