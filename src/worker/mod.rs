//! Worker side of the pool.
//!
//! - [`WorkerLoop`]: claims queued jobs from a [`JobStore`](crate::store::JobStore),
//!   runs them through a [`TaskRegistry`](crate::task::TaskRegistry) and writes
//!   the outcome back. Exits after `worker_timeout` without a job.
//! - [`Spawner`]: starts workers for the master and reports their exit.
//!   [`ProcessSpawner`] starts OS processes, [`InProcessSpawner`] runs the loop
//!   as a tokio task.
//!
//! # Execution Flow
//!
//! 1. `find_one(status = queued)` picks the oldest queued job
//! 2. A conditional update claims it; on a lost race the next one is tried
//! 3. The handler runs in its own task so a panic is caught
//! 4. `completed` or `failed` is written, guarded by `{started, worker = self}`
//! 5. Loop again at once while the queue is non-empty, otherwise sleep

pub mod runner;
pub mod spawner;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerProcessConfig;
use crate::error::Result;
use crate::store::RemoteStore;
use crate::task::TaskRegistry;

pub use runner::{WorkerLoop, WorkerOutcome};
pub use spawner::{InProcessSpawner, ProcessSpawner, Spawner, WorkerExit, WorkerHandle};

/// Exit status of a worker process stopped by SIGTERM or SIGINT. Only an
/// idle timeout exits with 0.
pub const SHUTDOWN_EXIT_CODE: i32 = 130;

/// Entry point of a worker process: connect to the master's store and run
/// the loop until it idles out or `shutdown` fires.
pub async fn run_process(
    config: WorkerProcessConfig,
    registry: TaskRegistry,
    shutdown: CancellationToken,
) -> Result<WorkerOutcome> {
    tracing::debug!(
        worker_id = config.worker.worker_id,
        master_addr = %config.master_addr,
        "Connecting to master"
    );
    let store = RemoteStore::connect(config.master_addr).await?;

    WorkerLoop::new(config.worker, Arc::new(store), Arc::new(registry))
        .with_shutdown(shutdown)
        .run()
        .await
}
