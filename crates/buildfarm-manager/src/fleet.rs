//! Fleet discovery.
//!
//! Workers are registered out of band; the watcher's only job is to spot
//! names it has not seen before so the manager can start a scan cycle for
//! them. Disappeared workers are deliberately left alone: their cycles
//! keep probing and surface errors through the normal failure path.

use std::collections::HashSet;
use std::time::Duration;

use buildfarm_db::{DbResult, Store};

/// Default pause between registry scans. Much coarser than the per-worker
/// interval; new workers are rare.
pub const FLEET_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
pub struct FleetWatcher {
    known: HashSet<String>,
}

impl FleetWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the workers already being scanned.
    pub fn with_known(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            known: names.into_iter().collect(),
        }
    }

    /// Diff the registry against everything seen so far; returns the
    /// newcomers.
    pub async fn scan(&mut self, store: &dyn Store) -> DbResult<Vec<String>> {
        let names = store.list_worker_names().await?;
        let new: Vec<String> = names
            .iter()
            .filter(|name| !self.known.contains(*name))
            .cloned()
            .collect();
        self.known.extend(names);
        Ok(new)
    }
}
