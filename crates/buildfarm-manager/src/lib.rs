//! Build-farm coordination.
//!
//! One `WorkerScanner` per worker drives the probe/reconcile/dispatch
//! cycle on a recurring timer; the `FleetWatcher` picks up newly
//! registered workers; `BuildFarmManager` owns the lifecycle of all of
//! them. Failure attribution between a worker and its job lives in
//! `failure`.

pub mod failure;
pub mod fleet;
pub mod manager;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testing;

pub use failure::{FailureVerdict, assess};
pub use fleet::FleetWatcher;
pub use manager::{BuildFarmManager, ManagerConfig};
pub use scanner::{ScannerHandle, WorkerScanner};
