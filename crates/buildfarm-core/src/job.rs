//! Build job domain types.

use crate::{JobId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pool for an idle worker.
    NeedsBuild,
    /// Claimed by a worker and running.
    Building,
    /// Finished on the worker, artifacts being collected.
    Uploading,
    /// Completed successfully.
    FullyBuilt,
    /// Failed for good; not retried automatically.
    FailedToBuild,
    Superseded,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::FullyBuilt
                | JobStatus::FailedToBuild
                | JobStatus::Superseded
                | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NeedsBuild => "needsbuild",
            JobStatus::Building => "building",
            JobStatus::Uploading => "uploading",
            JobStatus::FullyBuilt => "fullybuilt",
            JobStatus::FailedToBuild => "failedtobuild",
            JobStatus::Superseded => "superseded",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "needsbuild" => Ok(JobStatus::NeedsBuild),
            "building" => Ok(JobStatus::Building),
            "uploading" => Ok(JobStatus::Uploading),
            "fullybuilt" => Ok(JobStatus::FullyBuilt),
            "failedtobuild" => Ok(JobStatus::FailedToBuild),
            "superseded" => Ok(JobStatus::Superseded),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One unit of work, claimed by at most one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub status: JobStatus,
    /// Consecutive failures attributed to this job across workers.
    pub failure_count: i32,
    /// Must run on a virtualized worker.
    pub virtualized: bool,
    /// The worker currently holding the claim, if any.
    pub worker: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
}
