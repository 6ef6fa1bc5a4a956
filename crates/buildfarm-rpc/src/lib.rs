//! HTTP worker driver.
//!
//! Build workers expose a small JSON-over-HTTP endpoint; this crate
//! implements the `WorkerDriver` trait against it and the scheduling query
//! against the store.

pub mod http;

pub use http::{HttpDriverFactory, HttpWorkerDriver};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker reports when asked for its status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerStatusReport {
    /// Nothing running, ready for work.
    Idle,
    /// A build is in progress.
    Building {
        job: Uuid,
        #[serde(default)]
        log_tail: Option<String>,
    },
    /// The build finished; the worker is waiting for its result to be
    /// collected.
    Waiting { job: Uuid, successful: bool },
    /// An abort was requested and has not completed yet.
    Aborting { job: Uuid },
}

impl WorkerStatusReport {
    /// The job the worker believes it is holding, in any state.
    pub fn job(&self) -> Option<Uuid> {
        match self {
            WorkerStatusReport::Idle => None,
            WorkerStatusReport::Building { job, .. }
            | WorkerStatusReport::Waiting { job, .. }
            | WorkerStatusReport::Aborting { job } => Some(*job),
        }
    }
}

/// Body of a dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartBuildRequest {
    pub job: Uuid,
}
