//! Worker domain types.

use crate::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A build worker as recorded in the store.
///
/// Scan cycles re-fetch this at the start of every tick rather than caching
/// it, so a tick always sees state committed by other cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub name: String,
    /// Base URL of the worker's RPC endpoint.
    pub url: String,
    /// False once failure assessment has taken the worker out of rotation.
    pub healthy: bool,
    /// Consecutive scan or dispatch failures attributed to this worker.
    /// Reset to zero only on a successful dispatch.
    pub failure_count: i32,
    /// Manual-mode workers are excluded from automatic dispatch.
    pub manual: bool,
    /// Virtualized workers only run jobs flagged for virtualized builds.
    pub virtualized: bool,
    /// Free-text note recorded when the worker was disabled.
    pub failure_note: Option<String>,
    pub created_at: DateTime<Utc>,
}
