//! Shared job collection.
//!
//! The master owns a [`MemoryStore`]; worker processes reach the same
//! collection through [`RemoteStore`], a gRPC client. Both implement
//! [`JobStore`], so the worker loop and the master are written once against
//! the trait.
//!
//! # Claiming
//!
//! Every state change goes through [`JobStore::conditional_update`], which
//! applies a [`Transition`] only if the record still matches an
//! [`Expected`] precondition. Two callers racing to claim the same queued job
//! cannot both win: the loser sees `false` and moves on.

pub mod job;
pub mod memory;
pub mod remote;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use job::{Expected, JobFilter, JobId, JobRecord, JobStatus, Transition, WorkerId};
pub use memory::MemoryStore;
pub use remote::RemoteStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if a record with the same id exists.
    async fn insert(&self, job: JobRecord) -> Result<JobId>;

    /// Apply `transition` to record `id` if it matches `expected`.
    ///
    /// Returns `Ok(false)` when the record is missing or no longer matches.
    async fn conditional_update(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool>;

    /// All matching records in insertion order.
    async fn find(&self, filter: JobFilter) -> Result<Vec<JobRecord>>;

    /// The oldest matching record.
    async fn find_one(&self, filter: JobFilter) -> Result<Option<JobRecord>>;

    async fn count(&self, filter: JobFilter) -> Result<usize>;

    async fn remove(&self, id: JobId) -> Result<bool>;

    /// Subscribe to records entering `filter`.
    ///
    /// Records already matching are delivered first. After that each record
    /// is delivered once per insert or update that moves it into the filter.
    async fn watch(&self, filter: JobFilter) -> Result<mpsc::UnboundedReceiver<JobRecord>>;
}
