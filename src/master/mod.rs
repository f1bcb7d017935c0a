//! Master controller.
//!
//! The master accepts submissions, writes queued job records into the store
//! and starts workers on demand, never more than `pool_size` at a time. It
//! learns about results by watching the store for records that reach
//! `completed` or `failed`, and resolves the matching [`JobHandle`].
//!
//! # Background Tasks
//!
//! - **Completion watcher**: resolves handles and removes finished records
//! - **Exit watcher**: drops exited workers, recovers their orphaned jobs and
//!   tops the pool back up
//! - **Stall watcher** (only with `job_timeout`): kills the worker of a job
//!   that has been running too long

pub mod handle;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::store::{
    Expected, JobFilter, JobId, JobRecord, JobStatus, JobStore, Transition, WorkerId,
};
use crate::task::{chunk, TaskCall};
use crate::worker::{Spawner, WorkerExit};

pub use handle::{wait, wait_all, JobHandle};
pub use registry::{WorkerEntry, WorkerRegistry};

use handle::Outcome;

const MIN_STALL_CHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct State {
    workers: WorkerRegistry,
    pending: HashMap<JobId, oneshot::Sender<Outcome>>,
    /// Submitted jobs whose handle has not fired yet
    outstanding: usize,
}

struct Inner {
    config: PoolConfig,
    store: Arc<dyn JobStore>,
    spawner: Arc<dyn Spawner>,
    state: Mutex<State>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    shutdown: CancellationToken,
}

/// Handle to a running master. Cheap to clone.
#[derive(Clone)]
pub struct Master {
    inner: Arc<Inner>,
}

impl Master {
    /// Clear the collection and start the background watchers.
    pub async fn start(
        config: PoolConfig,
        store: Arc<dyn JobStore>,
        spawner: Arc<dyn Spawner>,
    ) -> Result<Self> {
        config.validate()?;

        let stale = store.find(JobFilter::all()).await?;
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Clearing jobs from a previous run");
        }
        for job in stale {
            store.remove(job.id).await?;
        }

        let completed = store.watch(JobFilter::status(JobStatus::Completed)).await?;
        let failed = store.watch(JobFilter::status(JobStatus::Failed)).await?;
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();

        let master = Self {
            inner: Arc::new(Inner {
                config,
                store,
                spawner,
                state: Mutex::new(State::default()),
                exits: exits_tx,
                shutdown: CancellationToken::new(),
            }),
        };

        tokio::spawn(master.clone().watch_completed_jobs(completed, failed));
        tokio::spawn(master.clone().watch_exited_workers(exits_rx));
        if let Some(timeout) = master.inner.config.job_timeout {
            tokio::spawn(master.clone().watch_stalled_jobs(timeout));
        }

        tracing::info!(
            pool_size = master.inner.config.pool_size,
            chunk_size = master.inner.config.chunk_size,
            "Master started"
        );
        Ok(master)
    }

    /// Queue one job running `task` with `params`.
    ///
    /// Returns as soon as the job is stored; await the handle for the result.
    pub async fn submit<P, R>(&self, task: &str, params: &P) -> Result<JobHandle<R>>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.submit_call(TaskCall::single(task, params)?).await
    }

    /// Queue a prepared call.
    pub async fn submit_call<R: DeserializeOwned>(&self, call: TaskCall) -> Result<JobHandle<R>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        let job = JobRecord::queued(call);
        let id = job.id;
        let task = job.task.clone();

        // Registered before the insert so a fast worker cannot finish first
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            // Shutdown cancels before taking this lock, so either it clears
            // this entry or the check below sees the cancellation
            if self.inner.shutdown.is_cancelled() {
                return Err(PoolError::ShutDown);
            }
            state.pending.insert(id, tx);
            state.outstanding += 1;
        }

        if let Err(e) = self.maybe_spawn_worker().await {
            self.rollback(id).await;
            return Err(e);
        }
        if let Err(e) = self.inner.store.insert(job).await {
            self.rollback(id).await;
            return Err(e);
        }

        tracing::debug!(job_id = %id, task = %task, "Job submitted");
        Ok(JobHandle::new(id, rx))
    }

    async fn rollback(&self, id: JobId) {
        let mut state = self.inner.state.lock().await;
        if state.pending.remove(&id).is_some() {
            state.outstanding = state.outstanding.saturating_sub(1);
        }
    }

    /// Apply `task` to every item using the configured chunk size.
    pub async fn map<T, R>(&self, items: &[T], task: &str) -> Result<Vec<R>>
    where
        T: Serialize + Clone,
        R: DeserializeOwned,
    {
        self.map_chunked(items, task, self.inner.config.chunk_size)
            .await
    }

    /// Apply `task` to every item, `chunk_size` items per job.
    ///
    /// Results come back in input order.
    pub async fn map_chunked<T, R>(
        &self,
        items: &[T],
        task: &str,
        chunk_size: usize,
    ) -> Result<Vec<R>>
    where
        T: Serialize + Clone,
        R: DeserializeOwned,
    {
        if chunk_size == 0 {
            return Err(PoolError::InvalidChunkSize);
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let groups = chunk(items, chunk_size);
        tracing::debug!(task, items = items.len(), jobs = groups.len(), "Mapping");

        let mut handles = Vec::with_capacity(groups.len());
        for group in &groups {
            let call = TaskCall::batch(task, group)?;
            handles.push(self.submit_call::<Vec<R>>(call).await?);
        }

        let results = wait_all(handles).await?;
        Ok(results.into_iter().flatten().collect())
    }

    /// Start one worker if there is more outstanding work than live workers
    /// and the pool is not full. Returns the new worker's id.
    pub async fn maybe_spawn_worker(&self) -> Result<Option<WorkerId>> {
        // Held across the spawn so concurrent callers cannot overshoot the cap
        let mut state = self.inner.state.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return Ok(None);
        }

        let live = state.workers.len();
        if live >= state.outstanding || live >= self.inner.config.pool_size {
            return Ok(None);
        }

        let worker_id = state.workers.allocate_id();
        let handle = self
            .inner
            .spawner
            .spawn(
                self.inner.config.worker(worker_id),
                self.inner.exits.clone(),
            )
            .await?;
        state.workers.register(handle);

        tracing::info!(
            worker_id,
            live = state.workers.len(),
            outstanding = state.outstanding,
            "Worker spawned"
        );
        Ok(Some(worker_id))
    }

    async fn watch_completed_jobs(
        self,
        mut completed: mpsc::UnboundedReceiver<JobRecord>,
        mut failed: mpsc::UnboundedReceiver<JobRecord>,
    ) {
        loop {
            let job = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                Some(job) = completed.recv() => job,
                Some(job) = failed.recv() => job,
                else => break,
            };
            self.finish_job(job).await;
        }
        tracing::debug!("Completion watcher stopped");
    }

    async fn finish_job(&self, job: JobRecord) {
        let sender = {
            let mut state = self.inner.state.lock().await;
            // Not ours
            let Some(sender) = state.pending.remove(&job.id) else {
                return;
            };
            state.outstanding = state.outstanding.saturating_sub(1);
            sender
        };

        if let Err(e) = self.inner.store.remove(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove finished job");
        }

        let outcome = match job.status {
            JobStatus::Completed => Ok(job.result.unwrap_or_else(|| "null".to_string())),
            _ => Err(job.error.unwrap_or_else(|| "job failed".to_string())),
        };
        if outcome.is_err() {
            tracing::warn!(job_id = %job.id, task = %job.task, "Job finished with failure");
        } else {
            tracing::debug!(job_id = %job.id, "Job completed");
        }
        // Caller may have stopped waiting
        let _ = sender.send(outcome);
    }

    async fn watch_exited_workers(self, mut exits: mpsc::UnboundedReceiver<WorkerExit>) {
        loop {
            let exit = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                exit = exits.recv() => match exit {
                    Some(exit) => exit,
                    None => break,
                },
            };
            self.handle_exit(exit).await;
        }
        tracing::debug!("Exit watcher stopped");
    }

    async fn handle_exit(&self, exit: WorkerExit) {
        let worker_id = exit.worker_id;
        let removed = self.inner.state.lock().await.workers.remove(worker_id);
        let uptime_ms = removed
            .map(|entry| entry.spawned_at.elapsed().as_millis() as u64)
            .unwrap_or_default();

        if exit.voluntary {
            tracing::info!(worker_id, uptime_ms, "Worker exited after idle timeout");
        } else {
            tracing::warn!(
                worker_id,
                code = ?exit.code,
                signal = ?exit.signal,
                uptime_ms,
                "Worker exited abnormally"
            );
        }

        if let Err(e) = self.recover_orphans(worker_id).await {
            tracing::warn!(worker_id, error = %e, "Failed to recover orphaned jobs");
        }
        if let Err(e) = self.maybe_spawn_worker().await {
            tracing::warn!(error = %e, "Failed to replace exited worker");
        }
    }

    /// Requeue or fail every job left `started` by `worker_id`. Returns how
    /// many records were changed.
    pub async fn recover_orphans(&self, worker_id: WorkerId) -> Result<usize> {
        let orphans = self
            .inner
            .store
            .find(JobFilter::status(JobStatus::Started).with_worker(worker_id))
            .await?;

        let mut recovered = 0;
        for job in &orphans {
            if self.recover_job(job).await? {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn recover_job(&self, job: &JobRecord) -> Result<bool> {
        let Some(worker_id) = job.worker else {
            return Ok(false);
        };
        let max_attempts = self.inner.config.max_attempts;
        let transition = if job.attempts < max_attempts {
            Transition::Requeue
        } else {
            Transition::Fail {
                error: format!(
                    "worker {} exited while running job after {} of {} attempts",
                    worker_id, job.attempts, max_attempts
                ),
            }
        };
        let to = transition.to_status();

        let updated = self
            .inner
            .store
            .conditional_update(
                job.id,
                Expected::owned(JobStatus::Started, worker_id),
                transition,
            )
            .await?;
        if updated {
            tracing::warn!(
                job_id = %job.id,
                worker_id,
                attempts = job.attempts,
                status = %to,
                "Recovered orphaned job"
            );
        }
        Ok(updated)
    }

    async fn watch_stalled_jobs(self, timeout: Duration) {
        let mut ticker = tokio::time::interval((timeout / 4).max(MIN_STALL_CHECK));
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.kill_stalled_workers(timeout).await {
                tracing::warn!(error = %e, "Stall check failed");
            }
        }
        tracing::debug!("Stall watcher stopped");
    }

    async fn kill_stalled_workers(&self, timeout: Duration) -> Result<()> {
        let running = self
            .inner
            .store
            .find(JobFilter::status(JobStatus::Started))
            .await?;
        let now = Utc::now();

        let state = self.inner.state.lock().await;
        for job in running {
            let overdue = job.started_at.is_some_and(|at| {
                now.signed_duration_since(at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed >= timeout)
            });
            if !overdue {
                continue;
            }
            let Some(entry) = job.worker.and_then(|id| state.workers.get(id)) else {
                continue;
            };
            if !entry.handle.is_killed() {
                tracing::warn!(
                    job_id = %job.id,
                    worker_id = entry.handle.worker_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Job overran its deadline, killing worker"
                );
                entry.handle.kill();
            }
        }
        Ok(())
    }

    /// Stop the watchers and kill every worker. Unresolved handles resolve
    /// with [`PoolError::ShutDown`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let mut state = self.inner.state.lock().await;
        let workers = state.workers.drain();
        for entry in &workers {
            entry.handle.kill();
        }
        let dropped = state.pending.len();
        state.pending.clear();
        state.outstanding = 0;

        tracing::info!(
            workers = workers.len(),
            pending = dropped,
            "Master shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub async fn live_workers(&self) -> usize {
        self.inner.state.lock().await.workers.len()
    }

    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        self.inner.state.lock().await.workers.ids()
    }

    pub async fn outstanding(&self) -> usize {
        self.inner.state.lock().await.outstanding
    }

    /// Workers started since the master began, including exited ones.
    pub async fn spawned_total(&self) -> u64 {
        self.inner.state.lock().await.workers.spawned_total()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.inner.store.clone()
    }
}
