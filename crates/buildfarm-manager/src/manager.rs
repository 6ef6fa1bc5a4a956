//! Process-wide coordinator lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use buildfarm_core::driver::WorkerDriverFactory;
use buildfarm_core::{Error, Result};
use buildfarm_db::Store;

use crate::fleet::{FLEET_INTERVAL, FleetWatcher};
use crate::scanner::{SCAN_INTERVAL, ScannerHandle, WorkerScanner};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Pause between scans of one worker.
    pub scan_interval: Duration,
    /// Pause between registry scans for new workers.
    pub fleet_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_interval: SCAN_INTERVAL,
            fleet_interval: FLEET_INTERVAL,
        }
    }
}

type ScannerRegistry = Arc<Mutex<HashMap<String, ScannerHandle>>>;

/// Owns every scan cycle plus the fleet watcher task.
pub struct BuildFarmManager {
    store: Arc<dyn Store>,
    drivers: Arc<dyn WorkerDriverFactory>,
    config: ManagerConfig,
    scanners: ScannerRegistry,
    fleet: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl BuildFarmManager {
    pub fn new(
        store: Arc<dyn Store>,
        drivers: Arc<dyn WorkerDriverFactory>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            drivers,
            config,
            scanners: Arc::new(Mutex::new(HashMap::new())),
            fleet: None,
        }
    }

    /// Start one scan cycle per registered worker, then the fleet watcher.
    pub async fn start(&mut self) -> Result<()> {
        if self.fleet.is_some() {
            return Err(Error::Internal("manager already started".to_string()));
        }

        let names = self.store.list_worker_names().await?;
        info!(workers = names.len(), "starting build farm coordinator");
        for name in &names {
            spawn_scanner(
                name.clone(),
                self.store.clone(),
                self.drivers.clone(),
                self.config.scan_interval,
                &self.scanners,
            );
        }

        let mut watcher = FleetWatcher::with_known(names);
        let store = self.store.clone();
        let drivers = self.drivers.clone();
        let registry = self.scanners.clone();
        let scan_interval = self.config.scan_interval;
        let fleet_interval = self.config.fleet_interval;
        let (shutdown, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(fleet_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match watcher.scan(store.as_ref()).await {
                            Ok(new) => {
                                for name in new {
                                    info!(worker = %name, "new worker registered");
                                    spawn_scanner(
                                        name,
                                        store.clone(),
                                        drivers.clone(),
                                        scan_interval,
                                        &registry,
                                    );
                                }
                            }
                            Err(e) => warn!(error = %e, "fleet scan failed"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("fleet watcher stopped");
        });
        self.fleet = Some((shutdown, task));
        Ok(())
    }

    /// Stop every timer and wait for all tasks to wind down, so no scan is
    /// left mid-flight when the process exits.
    pub async fn stop(&mut self) {
        if let Some((shutdown, task)) = self.fleet.take() {
            shutdown.send_replace(true);
            if task.await.is_err() {
                error!("fleet watcher task panicked");
            }
        }

        let handles: Vec<ScannerHandle> = {
            let mut scanners = self.scanners.lock().expect("scanner registry poisoned");
            scanners.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.stop();
        }
        let count = handles.len();
        futures::future::join_all(handles.into_iter().map(ScannerHandle::stopped)).await;
        info!(scanners = count, "coordinator stopped");
    }

    /// Names of the workers currently being scanned.
    pub fn active_workers(&self) -> Vec<String> {
        self.scanners
            .lock()
            .expect("scanner registry poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

fn spawn_scanner(
    name: String,
    store: Arc<dyn Store>,
    drivers: Arc<dyn WorkerDriverFactory>,
    interval: Duration,
    registry: &ScannerRegistry,
) {
    let handle = WorkerScanner::new(name.clone(), store, drivers, interval).start();
    registry
        .lock()
        .expect("scanner registry poisoned")
        .insert(name, handle);
}
