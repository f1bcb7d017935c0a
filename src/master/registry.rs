use std::collections::HashMap;
use std::time::Instant;

use crate::store::WorkerId;
use crate::worker::WorkerHandle;

/// A live worker as seen by the master
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub handle: WorkerHandle,
    pub spawned_at: Instant,
}

/// Tracks live workers and hands out worker ids.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerEntry>,
    next_id: WorkerId,
    spawned_total: u64,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            next_id: 1,
            spawned_total: 0,
        }
    }

    /// Reserve the id for the next worker. Ids are never reused.
    pub fn allocate_id(&mut self) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, handle: WorkerHandle) {
        let worker_id = handle.worker_id;
        self.workers.insert(
            worker_id,
            WorkerEntry {
                handle,
                spawned_at: Instant::now(),
            },
        );
        self.spawned_total += 1;
        tracing::debug!(worker_id, live = self.workers.len(), "Worker registered");
    }

    pub fn remove(&mut self, worker_id: WorkerId) -> Option<WorkerEntry> {
        self.workers.remove(&worker_id)
    }

    pub fn get(&self, worker_id: WorkerId) -> Option<&WorkerEntry> {
        self.workers.get(&worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Live worker ids, sorted
    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn spawned_total(&self) -> u64 {
        self.spawned_total
    }

    /// Remove every worker, returning the entries.
    pub fn drain(&mut self) -> Vec<WorkerEntry> {
        self.workers.drain().map(|(_, entry)| entry).collect()
    }
}
