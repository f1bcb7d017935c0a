use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::store::{Expected, JobFilter, JobRecord, JobStatus, JobStore, Transition};
use crate::task::{TaskContext, TaskError, TaskRegistry};

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// No job ran for `worker_timeout`
    IdleTimeout,
    /// The shutdown token was cancelled
    Shutdown,
}

pub struct WorkerLoop {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    shutdown: CancellationToken,
}

impl WorkerLoop {
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn worker_id(&self) -> u64 {
        self.config.worker_id
    }

    /// Claim and run jobs until the worker idles out or is shut down.
    ///
    /// Store errors end the loop; job failures do not.
    pub async fn run(&self) -> Result<WorkerOutcome> {
        let worker_id = self.config.worker_id;
        tracing::info!(worker_id, "Starting worker");

        let mut last_run_job = Instant::now();
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(WorkerOutcome::Shutdown);
            }
            if last_run_job.elapsed() >= self.config.worker_timeout {
                tracing::info!(
                    worker_id,
                    idle_ms = last_run_job.elapsed().as_millis() as u64,
                    "Worker timed out"
                );
                return Ok(WorkerOutcome::IdleTimeout);
            }

            if let Some(job) = self.claim_next().await? {
                self.do_job(job).await?;
                last_run_job = Instant::now();
            }

            // Keep going without a pause while there is a backlog
            if self.store.count(JobFilter::status(JobStatus::Queued)).await? > 0 {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(WorkerOutcome::Shutdown),
                _ = tokio::time::sleep(self.config.polling_interval) => {}
            }
        }
    }

    /// Claim the oldest queued job, retrying past records lost to other workers.
    pub async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let worker_id = self.config.worker_id;
        loop {
            let Some(job) = self
                .store
                .find_one(JobFilter::status(JobStatus::Queued))
                .await?
            else {
                return Ok(None);
            };

            let claimed = self
                .store
                .conditional_update(
                    job.id,
                    JobStatus::Queued.into(),
                    Transition::Claim { worker: worker_id },
                )
                .await?;
            if claimed {
                tracing::debug!(worker_id, job_id = %job.id, "Job claimed");
                let mut job = job;
                job.apply(Transition::Claim { worker: worker_id })?;
                return Ok(Some(job));
            }
            tracing::trace!(worker_id, job_id = %job.id, "Lost claim race");
        }
    }

    /// Run a claimed job and record its outcome. Returns the status written.
    pub async fn do_job(&self, job: JobRecord) -> Result<JobStatus> {
        let worker_id = self.config.worker_id;
        let ctx = TaskContext {
            worker_id,
            job_id: job.id,
        };
        let call = job.call();
        let registry = self.registry.clone();

        // A separate task turns a panicking handler into a JoinError
        let outcome = match tokio::spawn(async move { registry.invoke(&call, ctx).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(TaskError::panicked(&job.task, e)),
        };

        let transition = match outcome {
            Ok(result) => Transition::Complete { result },
            Err(e) => {
                tracing::warn!(worker_id, job_id = %job.id, task = %job.task, error = %e, "Job failed");
                Transition::Fail {
                    error: e.to_string(),
                }
            }
        };
        let status = transition.to_status();

        let written = self
            .store
            .conditional_update(
                job.id,
                Expected::owned(JobStatus::Started, worker_id),
                transition,
            )
            .await?;
        if written {
            tracing::info!(worker_id, job_id = %job.id, status = %status, "Finished job");
        } else {
            tracing::warn!(
                worker_id,
                job_id = %job.id,
                "Job was reassigned before it finished, outcome discarded"
            );
        }
        Ok(status)
    }
}
