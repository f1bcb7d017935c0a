use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use procpool::builtin;
use procpool::config::{PoolConfig, WorkerCommand, WorkerProcessConfig};
use procpool::shutdown::install_shutdown_handler;
use procpool::worker::{self, WorkerOutcome, SHUTDOWN_EXIT_CODE};
use procpool::Pool;

#[derive(Parser, Debug)]
#[command(name = "procpool")]
#[command(version)]
#[command(about = "Run batches of tasks across a pool of worker processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run as a worker process (started by the master, configured through the environment)
    Worker,

    /// Map a built-in task over the integers 0..count
    Map(MapArgs),

    /// List the built-in tasks
    Tasks,
}

#[derive(Parser, Debug)]
struct MapArgs {
    /// Built-in task to run (see `procpool tasks`)
    task: String,

    /// Number of inputs
    #[arg(long, short = 'n', default_value = "250")]
    count: i64,

    /// Maximum number of worker processes (defaults to the CPU count)
    #[arg(long, env = "PROCPOOL_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Inputs per job
    #[arg(long, default_value = "5")]
    chunk_size: usize,

    /// Idle wait between claim attempts
    #[arg(long, default_value = "100")]
    polling_interval_ms: u64,

    /// Workers exit after this long without a job
    #[arg(long, default_value = "60000")]
    worker_timeout_ms: u64,

    /// Kill the worker of a job that runs longer than this
    #[arg(long)]
    job_timeout_ms: Option<u64>,

    /// Claims per job before an orphaned job is failed
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct MapOutput {
    task: String,
    results: Vec<MapItem>,
}

#[derive(Serialize)]
struct MapItem {
    input: i64,
    result: Value,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker() -> Result<WorkerOutcome, Box<dyn std::error::Error>> {
    let config = WorkerProcessConfig::from_env()?;
    let shutdown = install_shutdown_handler()?;
    let worker_id = config.worker.worker_id;

    let outcome = worker::run_process(config, builtin::registry(), shutdown).await?;
    match outcome {
        WorkerOutcome::IdleTimeout => tracing::info!(worker_id, "Worker exiting after idle timeout"),
        WorkerOutcome::Shutdown => tracing::info!(worker_id, "Worker shut down"),
    }
    Ok(outcome)
}

// =============================================================================
// Map
// =============================================================================

async fn run_map(args: MapArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = builtin::registry();
    if !registry.contains(&args.task) {
        return Err(format!(
            "unknown task {:?}, expected one of: {}",
            args.task,
            registry.names().join(", ")
        )
        .into());
    }

    let mut config = PoolConfig::default()
        .with_chunk_size(args.chunk_size)
        .with_polling_interval(Duration::from_millis(args.polling_interval_ms))
        .with_worker_timeout(Duration::from_millis(args.worker_timeout_ms))
        .with_max_attempts(args.max_attempts);
    if let Some(pool_size) = args.pool_size {
        config = config.with_pool_size(pool_size);
    }
    if let Some(ms) = args.job_timeout_ms {
        config = config.with_job_timeout(Duration::from_millis(ms));
    }

    let pool = Pool::launch(config, WorkerCommand::current_exe()?).await?;
    let inputs: Vec<i64> = (0..args.count.max(0)).collect();
    let outcome = pool.map::<i64, Value>(&inputs, &args.task).await;
    let spawned = pool.spawned_total().await;
    pool.shutdown().await?;
    let results = outcome?;

    tracing::info!(
        task = %args.task,
        items = results.len(),
        workers = spawned,
        "Map finished"
    );

    match args.output {
        OutputFormat::Json => {
            let output = MapOutput {
                task: args.task,
                results: inputs
                    .into_iter()
                    .zip(results)
                    .map(|(input, result)| MapItem { input, result })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<10} RESULT", "INPUT");
            println!("{}", "-".repeat(40));
            for (input, result) in inputs.iter().zip(&results) {
                println!("{:<10} {}", input, result);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Worker => {
            init_tracing();
            // One thread per worker process; batch items interleave at await points
            let outcome = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(run_worker())?;
            // The master treats exit status 0 as an idle timeout
            if outcome == WorkerOutcome::Shutdown {
                std::process::exit(SHUTDOWN_EXIT_CODE);
            }
        }
        Commands::Map(map_args) => {
            init_tracing();
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run_map(map_args))?;
        }
        Commands::Tasks => {
            for name in builtin::registry().names() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
