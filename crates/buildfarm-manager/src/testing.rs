//! In-memory fakes for scanner, fleet, and manager tests.
//!
//! `FakeStore` models the commit/abort discipline: a session works on a
//! draft copy of the farm state and only `commit` publishes it, so tests
//! can check that aborted ticks leave nothing behind.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use buildfarm_core::driver::{WorkerDriver, WorkerDriverFactory};
use buildfarm_core::{Error, JobId, JobInfo, JobStatus, Result, WorkerId, WorkerInfo};
use buildfarm_db::{DbError, DbResult, Store, StoreSession};

pub fn worker(name: &str) -> WorkerInfo {
    WorkerInfo {
        id: WorkerId::new(),
        name: name.to_string(),
        url: format!("http://{name}.example:8221/"),
        healthy: true,
        failure_count: 0,
        manual: false,
        virtualized: false,
        failure_note: None,
        created_at: Utc::now(),
    }
}

pub fn job(status: JobStatus, worker: Option<WorkerId>) -> JobInfo {
    JobInfo {
        id: JobId::new(),
        status,
        failure_count: 0,
        virtualized: false,
        worker,
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FarmState {
    pub workers: Vec<WorkerInfo>,
    pub jobs: Vec<JobInfo>,
}

pub struct FakeStore {
    state: Arc<Mutex<FarmState>>,
    /// When set, every session write fails. Used to exercise the
    /// bookkeeping-failure path.
    pub fail_writes: Arc<AtomicBool>,
}

impl FakeStore {
    pub fn with_state(workers: Vec<WorkerInfo>, jobs: Vec<JobInfo>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(FarmState { workers, jobs })),
            fail_writes: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn worker(&self, name: &str) -> WorkerInfo {
        self.state
            .lock()
            .unwrap()
            .workers
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no worker {name}"))
    }

    pub fn job(&self, id: JobId) -> JobInfo {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no job {id}"))
    }

    pub fn add_worker(&self, worker: WorkerInfo) {
        self.state.lock().unwrap().workers.push(worker);
    }

    /// Claim a pending job directly, bypassing session drafts. Used by
    /// `FakeDriver::find_and_start_job`, which in the real driver commits
    /// its own session.
    fn claim_for(&self, worker_name: &str) -> Option<JobId> {
        let mut state = self.state.lock().unwrap();
        let worker = state.workers.iter().find(|w| w.name == worker_name)?.clone();
        let candidate = state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::NeedsBuild && j.virtualized == worker.virtualized)
            .min_by_key(|j| j.created_at)?;
        candidate.status = JobStatus::Building;
        candidate.worker = Some(worker.id);
        Some(candidate.id)
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn list_worker_names(&self) -> DbResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workers
            .iter()
            .map(|w| w.name.clone())
            .collect())
    }

    async fn session(&self) -> DbResult<Box<dyn StoreSession>> {
        Ok(Box::new(FakeSession {
            shared: self.state.clone(),
            draft: self.state.lock().unwrap().clone(),
            dirty_workers: Vec::new(),
            dirty_jobs: Vec::new(),
            fail_writes: self.fail_writes.clone(),
        }))
    }
}

/// Works on a draft snapshot; `commit` publishes only the rows this
/// session wrote, then re-snapshots so later reads see other writers'
/// commits, like a fresh transaction would.
pub struct FakeSession {
    shared: Arc<Mutex<FarmState>>,
    draft: FarmState,
    dirty_workers: Vec<WorkerId>,
    dirty_jobs: Vec<JobId>,
    fail_writes: Arc<AtomicBool>,
}

impl FakeSession {
    fn check_writable(&self) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(DbError::Invalid("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn job_mut(&mut self, id: JobId) -> DbResult<&mut JobInfo> {
        if !self.dirty_jobs.contains(&id) {
            self.dirty_jobs.push(id);
        }
        self.draft
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| DbError::NotFound(format!("job {id}")))
    }

    fn worker_mut(&mut self, id: WorkerId) -> DbResult<&mut WorkerInfo> {
        if !self.dirty_workers.contains(&id) {
            self.dirty_workers.push(id);
        }
        self.draft
            .workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| DbError::NotFound(format!("worker {id}")))
    }
}

#[async_trait]
impl StoreSession for FakeSession {
    async fn worker_by_name(&mut self, name: &str) -> DbResult<Option<WorkerInfo>> {
        Ok(self.draft.workers.iter().find(|w| w.name == name).cloned())
    }

    async fn current_job(&mut self, worker: WorkerId) -> DbResult<Option<JobInfo>> {
        Ok(self
            .draft
            .jobs
            .iter()
            .find(|j| j.worker == Some(worker) && !j.status.is_terminal())
            .cloned())
    }

    async fn claim_next_job(&mut self, worker: &WorkerInfo) -> DbResult<Option<JobInfo>> {
        self.check_writable()?;
        let virtualized = worker.virtualized;
        let worker_id = worker.id;
        let Some(id) = self
            .draft
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::NeedsBuild && j.virtualized == virtualized)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id)
        else {
            return Ok(None);
        };
        let job = self.job_mut(id)?;
        job.status = JobStatus::Building;
        job.worker = Some(worker_id);
        Ok(Some(job.clone()))
    }

    async fn reset_job(&mut self, job: JobId) -> DbResult<()> {
        self.check_writable()?;
        let job = self.job_mut(job)?;
        job.status = JobStatus::NeedsBuild;
        job.worker = None;
        Ok(())
    }

    async fn fail_job(&mut self, job: JobId) -> DbResult<()> {
        self.check_writable()?;
        let job = self.job_mut(job)?;
        job.status = JobStatus::FailedToBuild;
        job.worker = None;
        Ok(())
    }

    async fn finish_job(&mut self, job: JobId, successful: bool) -> DbResult<()> {
        self.check_writable()?;
        let job = self.job_mut(job)?;
        job.status = if successful {
            JobStatus::FullyBuilt
        } else {
            JobStatus::FailedToBuild
        };
        job.worker = None;
        Ok(())
    }

    async fn set_worker_health(
        &mut self,
        worker: WorkerId,
        healthy: bool,
        note: Option<&str>,
    ) -> DbResult<()> {
        self.check_writable()?;
        let note = note.map(str::to_string);
        let worker = self.worker_mut(worker)?;
        worker.healthy = healthy;
        worker.failure_note = note;
        Ok(())
    }

    async fn reset_worker_failures(&mut self, worker: WorkerId) -> DbResult<()> {
        self.check_writable()?;
        self.worker_mut(worker)?.failure_count = 0;
        Ok(())
    }

    async fn record_failure(&mut self, worker: WorkerId, job: Option<JobId>) -> DbResult<()> {
        self.check_writable()?;
        self.worker_mut(worker)?.failure_count += 1;
        if let Some(job) = job {
            self.job_mut(job)?.failure_count += 1;
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        {
            let mut shared = self.shared.lock().unwrap();
            for id in self.dirty_workers.drain(..) {
                if let Some(updated) = self.draft.workers.iter().find(|w| w.id == id) {
                    if let Some(slot) = shared.workers.iter_mut().find(|w| w.id == id) {
                        *slot = updated.clone();
                    }
                }
            }
            for id in self.dirty_jobs.drain(..) {
                if let Some(updated) = self.draft.jobs.iter().find(|j| j.id == id) {
                    if let Some(slot) = shared.jobs.iter_mut().find(|j| j.id == id) {
                        *slot = updated.clone();
                    }
                }
            }
        }
        self.draft = self.shared.lock().unwrap().clone();
        Ok(())
    }

    async fn abort(&mut self) -> DbResult<()> {
        self.dirty_workers.clear();
        self.dirty_jobs.clear();
        self.draft = self.shared.lock().unwrap().clone();
        Ok(())
    }
}

/// Scripted driver: failures are taken once, availability is a flag, and
/// every call is counted.
pub struct FakeDriver {
    store: Arc<FakeStore>,
    worker_name: String,
    pub probe_error: Mutex<Option<Error>>,
    pub update_error: Mutex<Option<Error>>,
    pub available: AtomicBool,
    pub probes: AtomicUsize,
    pub updates: AtomicUsize,
    pub dispatches: AtomicUsize,
}

impl FakeDriver {
    pub fn new(store: Arc<FakeStore>, worker_name: &str) -> Arc<Self> {
        Arc::new(Self {
            store,
            worker_name: worker_name.to_string(),
            probe_error: Mutex::new(None),
            update_error: Mutex::new(None),
            available: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_probe(&self, error: Error) {
        *self.probe_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_update(&self, error: Error) {
        *self.update_error.lock().unwrap() = Some(error);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerDriver for FakeDriver {
    async fn probe_and_reconcile(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.probe_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update_build(&self, _job: &JobInfo) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        match self.update_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn find_and_start_job(&self) -> Result<Option<JobId>> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.claim_for(&self.worker_name))
    }
}

pub struct FakeDriverFactory {
    driver: Arc<FakeDriver>,
}

impl FakeDriverFactory {
    pub fn new(driver: Arc<FakeDriver>) -> Arc<Self> {
        Arc::new(Self { driver })
    }
}

impl WorkerDriverFactory for FakeDriverFactory {
    fn driver_for(&self, _worker: &WorkerInfo) -> Arc<dyn WorkerDriver> {
        self.driver.clone()
    }
}
