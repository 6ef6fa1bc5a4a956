//! Failure attribution between a worker and its current job.
//!
//! A single counter cannot tell a flaky worker from a poison job. Both
//! sides keep their own consecutive-failure count, and comparing the two
//! trajectories is the cheapest signal available without deeper
//! diagnostics. Treat the verdict as a heuristic, not a guarantee.

use buildfarm_core::{JobInfo, WorkerInfo};
use buildfarm_db::{DbResult, StoreSession};
use tracing::info;

/// Where to lay the blame after a failed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Counters are equal: attribution is ambiguous. Put the job back in
    /// the pool and learn more from the next failure, if any.
    RetryJob,
    /// The worker has been failing across several jobs: take it out of
    /// rotation and retry the job elsewhere.
    DisableWorker,
    /// The job keeps failing on workers that are otherwise fine: fail it
    /// for good.
    FailJob,
}

/// The three-way comparison. Pure; never suspends.
pub fn assess(worker_failures: i32, job_failures: i32) -> FailureVerdict {
    if worker_failures == job_failures {
        FailureVerdict::RetryJob
    } else if worker_failures > job_failures {
        FailureVerdict::DisableWorker
    } else {
        FailureVerdict::FailJob
    }
}

/// Apply the verdict for a worker whose tick just failed. Counters must
/// already have been incremented via `StoreSession::record_failure`. Does
/// not commit; that is the caller's job.
pub async fn assess_and_apply(
    session: &mut dyn StoreSession,
    worker: &WorkerInfo,
    job: Option<&JobInfo>,
    note: &str,
) -> DbResult<()> {
    let Some(job) = job else {
        // No job to share the blame with.
        info!(worker = %worker.name, "failure with no current job, disabling worker");
        return session.set_worker_health(worker.id, false, Some(note)).await;
    };

    match assess(worker.failure_count, job.failure_count) {
        FailureVerdict::RetryJob => {
            info!(worker = %worker.name, job = %job.id, "ambiguous failure, returning job to the pool");
            session.reset_job(job.id).await
        }
        FailureVerdict::DisableWorker => {
            info!(worker = %worker.name, job = %job.id, "worker blamed, disabling it and rescuing the job");
            session.set_worker_health(worker.id, false, Some(note)).await?;
            session.reset_job(job.id).await
        }
        FailureVerdict::FailJob => {
            info!(worker = %worker.name, job = %job.id, "job blamed, failing it");
            session.fail_job(job.id).await
        }
    }
}
