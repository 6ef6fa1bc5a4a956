//! Worker driver trait.
//!
//! The scan cycle never speaks to a worker directly; it goes through a
//! `WorkerDriver`, which wraps the worker's RPC endpoint plus the
//! scheduling query needed to hand it new work. Every method crosses the
//! process boundary and may suspend.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{JobId, JobInfo, Result, WorkerInfo};

#[async_trait]
pub trait WorkerDriver: Send + Sync {
    /// Ask the worker for its live status and reconcile it against the
    /// store. A worker building something the store knows nothing about is
    /// aborted; a store claim the worker has forgotten is returned to the
    /// pool.
    async fn probe_and_reconcile(&self) -> Result<()>;

    /// Advance a building job: record log progress, or collect the result
    /// and move the job to a terminal status once the worker reports done.
    async fn update_build(&self, job: &JobInfo) -> Result<()>;

    /// Whether the worker can take work right now. Distinct from the
    /// persistent `healthy` flag: an unavailable worker may come back on
    /// its own.
    async fn is_available(&self) -> Result<bool>;

    /// Find a pending job this worker can run and instruct the worker to
    /// start it. Returns the claimed job id, or None when the pool has
    /// nothing suitable.
    async fn find_and_start_job(&self) -> Result<Option<JobId>>;
}

/// Builds a driver for a given worker record.
///
/// Drivers are constructed per tick from the freshly fetched worker row,
/// so a changed worker URL takes effect on the next scan.
pub trait WorkerDriverFactory: Send + Sync {
    fn driver_for(&self, worker: &WorkerInfo) -> Arc<dyn WorkerDriver>;
}
