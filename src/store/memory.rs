use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::error::{PoolError, Result};
use crate::store::job::{Expected, JobFilter, JobId, JobRecord, Transition};
use crate::store::JobStore;

#[derive(Debug)]
struct Slot {
    seq: u64,
    job: JobRecord,
}

#[derive(Debug)]
struct Watcher {
    filter: JobFilter,
    tx: mpsc::UnboundedSender<JobRecord>,
}

#[derive(Debug, Default)]
struct Collection {
    jobs: HashMap<JobId, Slot>,
    next_seq: u64,
    watchers: Vec<Watcher>,
}

impl Collection {
    fn matching(&self, filter: &JobFilter) -> Vec<&Slot> {
        let mut slots: Vec<&Slot> = self
            .jobs
            .values()
            .filter(|slot| filter.matches(&slot.job))
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots
    }

    /// Deliver `after` to every watcher it newly matches. Closed watchers are dropped.
    fn notify(&mut self, before: Option<&JobRecord>, after: &JobRecord) {
        self.watchers.retain(|watcher| {
            let entered =
                watcher.filter.matches(after) && !before.is_some_and(|b| watcher.filter.matches(b));
            if entered {
                watcher.tx.send(after.clone()).is_ok()
            } else {
                !watcher.tx.is_closed()
            }
        });
    }
}

/// In-memory job collection owned by the master.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current number of records
    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    /// Returns true if the collection is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get a copy of a record by ID
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.inner
            .read()
            .await
            .jobs
            .get(id)
            .map(|slot| slot.job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: JobRecord) -> Result<JobId> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(PoolError::DuplicateJob(job.id));
        }

        let id = job.id;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.notify(None, &job);
        inner.jobs.insert(id, Slot { seq, job });
        tracing::debug!(job_id = %id, "Job inserted");
        Ok(id)
    }

    async fn conditional_update(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(slot) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.matches(&slot.job) {
            return Ok(false);
        }

        let before = slot.job.clone();
        slot.job.apply(transition)?;
        let after = slot.job.clone();
        inner.notify(Some(&before), &after);

        tracing::debug!(job_id = %id, from = %before.status, to = %after.status, "Job updated");
        Ok(true)
    }

    async fn find(&self, filter: JobFilter) -> Result<Vec<JobRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .matching(&filter)
            .into_iter()
            .map(|slot| slot.job.clone())
            .collect())
    }

    async fn find_one(&self, filter: JobFilter) -> Result<Option<JobRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|slot| filter.matches(&slot.job))
            .min_by_key(|slot| slot.seq)
            .map(|slot| slot.job.clone()))
    }

    async fn count(&self, filter: JobFilter) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|slot| filter.matches(&slot.job))
            .count())
    }

    async fn remove(&self, id: JobId) -> Result<bool> {
        Ok(self.inner.write().await.jobs.remove(&id).is_some())
    }

    async fn watch(&self, filter: JobFilter) -> Result<mpsc::UnboundedReceiver<JobRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        for slot in inner.matching(&filter) {
            // Receiver is still in hand, so this cannot fail.
            let _ = tx.send(slot.job.clone());
        }
        inner.watchers.push(Watcher { filter, tx });
        Ok(rx)
    }
}
