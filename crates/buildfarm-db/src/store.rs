//! Store and session traits.
//!
//! A `StoreSession` is an explicit unit of work. Scan cycles commit at
//! several points within one tick, always between worker round-trips, so
//! no row lock is ever held across the network. `commit` and `abort` are
//! safe to call when nothing is pending; an aborted session can keep being
//! used and simply starts a fresh transaction.

pub mod pg;

use async_trait::async_trait;

use buildfarm_core::{JobId, JobInfo, WorkerId, WorkerInfo};

use crate::DbResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// Names of all registered workers. Used at startup and by fleet
    /// discovery.
    async fn list_worker_names(&self) -> DbResult<Vec<String>>;

    /// Open a unit of work.
    async fn session(&self) -> DbResult<Box<dyn StoreSession>>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Fetch a worker fresh by name. Returns None for a worker that has
    /// been deregistered since its scan cycle started.
    async fn worker_by_name(&mut self, name: &str) -> DbResult<Option<WorkerInfo>>;

    /// The job currently claimed by the worker, if any.
    async fn current_job(&mut self, worker: WorkerId) -> DbResult<Option<JobInfo>>;

    /// Claim the oldest pending job compatible with the worker and mark it
    /// building there. Returns None when the pool has nothing suitable.
    async fn claim_next_job(&mut self, worker: &WorkerInfo) -> DbResult<Option<JobInfo>>;

    /// Return a job to the pending pool and clear its worker assignment.
    async fn reset_job(&mut self, job: JobId) -> DbResult<()>;

    /// Terminal failure: mark the job failed-to-build and drop the
    /// worker's claim. The job is not retried.
    async fn fail_job(&mut self, job: JobId) -> DbResult<()>;

    /// A build the worker reported done: move the job to its terminal
    /// status and release the worker.
    async fn finish_job(&mut self, job: JobId, successful: bool) -> DbResult<()>;

    /// Flip the worker's health flag, recording a note when disabling it.
    async fn set_worker_health(
        &mut self,
        worker: WorkerId,
        healthy: bool,
        note: Option<&str>,
    ) -> DbResult<()>;

    /// Clear the worker's failure counter after a successful dispatch.
    async fn reset_worker_failures(&mut self, worker: WorkerId) -> DbResult<()>;

    /// Increment the failure counters of the worker and, when present, its
    /// current job. Both trajectories feed failure assessment.
    async fn record_failure(&mut self, worker: WorkerId, job: Option<JobId>) -> DbResult<()>;

    /// Commit outstanding writes. A no-op when nothing is pending.
    async fn commit(&mut self) -> DbResult<()>;

    /// Discard outstanding writes. Safe to call repeatedly.
    async fn abort(&mut self) -> DbResult<()>;
}
