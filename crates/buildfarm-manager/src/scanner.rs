//! Per-worker scan cycle.
//!
//! Each registered worker gets one `WorkerScanner` running on its own
//! recurring timer: probe the worker, commit, collect or advance its
//! current build, commit, then dispatch new work if it is idle. Steps
//! within a tick are strictly sequential; ticks of different workers
//! interleave freely on the runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use buildfarm_core::driver::WorkerDriverFactory;
use buildfarm_core::{Error, Result};
use buildfarm_db::{Store, StoreSession};

/// Default pause between scans of one worker.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct WorkerScanner {
    name: String,
    store: Arc<dyn Store>,
    drivers: Arc<dyn WorkerDriverFactory>,
    interval: Duration,
}

/// Handle to a running scan cycle.
pub struct ScannerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScannerHandle {
    pub fn worker_name(&self) -> &str {
        &self.name
    }

    /// Cancel the recurring timer. Idempotent; an in-flight tick runs to
    /// completion.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop the cycle and wait for its task to wind down.
    pub async fn stopped(self) {
        self.stop();
        if self.task.await.is_err() {
            error!(worker = %self.name, "scan task panicked");
        }
    }
}

impl WorkerScanner {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        drivers: Arc<dyn WorkerDriverFactory>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            drivers,
            interval,
        }
    }

    /// Spawn the recurring scan task.
    pub fn start(self) -> ScannerHandle {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let name = self.name.clone();
        info!(worker = %name, "starting scan cycle");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.scan().await,
                    _ = stop_rx.changed() => break,
                }
            }
            debug!(worker = %self.name, "scan cycle stopped");
        });
        ScannerHandle {
            name,
            shutdown,
            task,
        }
    }

    /// One tick. Never returns an error and never panics: any failure is
    /// absorbed into the worker/job failure bookkeeping so the cycle stays
    /// alive for the next interval.
    pub async fn scan(&self) {
        let mut session = match self.store.session().await {
            Ok(session) => session,
            Err(e) => {
                error!(worker = %self.name, error = %e, "could not open store session");
                return;
            }
        };
        if let Err(error) = self.scan_once(session.as_mut()).await {
            self.handle_failure(session.as_mut(), error).await;
        }
    }

    /// The probe/reconcile/dispatch sequence for one tick. Commits between
    /// steps so no transaction spans a worker round-trip.
    async fn scan_once(&self, session: &mut dyn StoreSession) -> Result<()> {
        let Some(worker) = session.worker_by_name(&self.name).await? else {
            // Deregistered workers keep their cycle; it just has nothing
            // to do until the name reappears.
            warn!(worker = %self.name, "worker not registered, skipping scan");
            return Ok(());
        };
        let driver = self.drivers.driver_for(&worker);

        if worker.healthy {
            driver.probe_and_reconcile().await?;
        }
        session.commit().await?;

        let job = session.current_job(worker.id).await?;
        if let Some(job) = &job {
            driver.update_build(job).await?;
            session.commit().await?;
        }

        if worker.manual {
            debug!(worker = %self.name, "manual mode, not dispatching");
            return Ok(());
        }
        if !driver.is_available().await? {
            if !worker.healthy {
                if let Some(job) = &job {
                    info!(
                        worker = %self.name,
                        job = %job.id,
                        "disabled worker still holds a job, returning it to the pool"
                    );
                    session.reset_job(job.id).await?;
                    session.commit().await?;
                }
            }
            return Ok(());
        }

        // A worker still holding a claim after the update phase is busy;
        // only an idle worker gets new work.
        if session.current_job(worker.id).await?.is_some() {
            return Ok(());
        }
        if let Some(job) = driver.find_and_start_job().await? {
            info!(worker = %self.name, job = %job, "dispatched");
            session.reset_worker_failures(worker.id).await?;
            session.commit().await?;
        }
        Ok(())
    }

    /// Failure path: drop partial writes, log, then charge the failure to
    /// the worker and its job and let assessment decide who is at fault.
    async fn handle_failure(&self, session: &mut dyn StoreSession, error: Error) {
        if let Err(e) = session.abort().await {
            error!(worker = %self.name, error = %e, "could not abort failed scan");
            return;
        }
        if error.is_expected() {
            info!(worker = %self.name, "scan failed: {error}");
        } else {
            error!(worker = %self.name, error = ?error, "unexpected scan failure");
        }
        if let Err(e) = self.record_failure(session, &error).await {
            // The store itself is in trouble. Give up cleanly; retrying
            // from here risks looping on the same failure.
            error!(worker = %self.name, error = %e, "failure bookkeeping failed");
            let _ = session.abort().await;
        }
    }

    async fn record_failure(&self, session: &mut dyn StoreSession, error: &Error) -> Result<()> {
        let Some(worker) = session.worker_by_name(&self.name).await? else {
            return Ok(());
        };
        let job = session.current_job(worker.id).await?;
        session
            .record_failure(worker.id, job.as_ref().map(|j| j.id))
            .await?;
        // Re-fetch so assessment compares the incremented counters.
        let Some(worker) = session.worker_by_name(&self.name).await? else {
            return Ok(());
        };
        let job = session.current_job(worker.id).await?;
        crate::failure::assess_and_apply(session, &worker, job.as_ref(), &error.to_string())
            .await?;
        session.commit().await?;
        Ok(())
    }
}
