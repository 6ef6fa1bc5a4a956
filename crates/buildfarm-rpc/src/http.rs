//! `WorkerDriver` implementation over the worker's HTTP endpoint.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use buildfarm_core::driver::{WorkerDriver, WorkerDriverFactory};
use buildfarm_core::{Error, JobId, JobInfo, Result, WorkerInfo};
use buildfarm_db::{Store, StoreSession};

use crate::{StartBuildRequest, WorkerStatusReport};

/// Builds `HttpWorkerDriver`s sharing one HTTP client and store handle.
pub struct HttpDriverFactory {
    client: Client,
    store: Arc<dyn Store>,
}

impl HttpDriverFactory {
    /// The timeout bounds every worker round-trip so a dead peer cannot
    /// stall a scan tick indefinitely.
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { client, store })
    }
}

impl WorkerDriverFactory for HttpDriverFactory {
    fn driver_for(&self, worker: &WorkerInfo) -> Arc<dyn WorkerDriver> {
        Arc::new(HttpWorkerDriver {
            client: self.client.clone(),
            store: self.store.clone(),
            worker: worker.clone(),
        })
    }
}

/// Driver for a single worker, built fresh each tick from its store row.
pub struct HttpWorkerDriver {
    client: Client,
    store: Arc<dyn Store>,
    worker: WorkerInfo,
}

impl HttpWorkerDriver {
    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&self.worker.url)
            .and_then(|base| base.join(path))
            .map_err(|e| Error::Internal(format!("bad worker url {}: {e}", self.worker.url)))
    }

    async fn status(&self) -> Result<WorkerStatusReport> {
        let response = self
            .client
            .get(self.endpoint("status")?)
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(map_transport_error)?;
        response
            .json::<WorkerStatusReport>()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    async fn post(&self, path: &str, body: Option<&StartBuildRequest>) -> Result<()> {
        let mut request = self.client.post(self.endpoint(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(map_transport_error)?;
        Ok(())
    }

    /// Tell the worker to drop whatever it is doing.
    async fn abort(&self) -> Result<()> {
        self.post("abort", None).await
    }

    /// Power up a virtualized worker's host before handing it a build.
    async fn resume(&self) -> Result<()> {
        self.post("resume", None)
            .await
            .map_err(|e| Error::CannotResume(e.to_string()))
    }
}

#[async_trait]
impl WorkerDriver for HttpWorkerDriver {
    async fn probe_and_reconcile(&self) -> Result<()> {
        let mut session = self.store.session().await?;
        let expected = session.current_job(self.worker.id).await?;
        let report = self.status().await?;

        match (&expected, report.job()) {
            (None, None) => {}
            (Some(job), Some(reported)) if *job.id.as_uuid() == reported => {}
            (Some(job), None) => {
                // The worker lost the build (most likely it rebooted).
                // Return the job to the pool so it is dispatched again.
                info!(worker = %self.worker.name, job = %job.id, "worker lost its job, rescuing");
                session.reset_job(job.id).await?;
                session.commit().await?;
            }
            (None, Some(reported)) => {
                // The worker is building something we have no claim for.
                info!(worker = %self.worker.name, job = %reported, "worker busy with unknown job, aborting it");
                self.abort().await?;
            }
            (Some(job), Some(reported)) => {
                info!(
                    worker = %self.worker.name,
                    expected = %job.id,
                    actual = %reported,
                    "worker building the wrong job, aborting and rescuing"
                );
                self.abort().await?;
                session.reset_job(job.id).await?;
                session.commit().await?;
            }
        }
        Ok(())
    }

    async fn update_build(&self, job: &JobInfo) -> Result<()> {
        match self.status().await? {
            WorkerStatusReport::Building { log_tail, .. } => {
                if let Some(tail) = log_tail {
                    debug!(worker = %self.worker.name, job = %job.id, bytes = tail.len(), "build in progress");
                }
                Ok(())
            }
            WorkerStatusReport::Waiting { successful, .. } => {
                let mut session = self.store.session().await?;
                session.finish_job(job.id, successful).await?;
                session.commit().await?;
                // Release the worker for its next build.
                self.post("clean", None).await?;
                info!(worker = %self.worker.name, job = %job.id, successful, "build collected");
                Ok(())
            }
            WorkerStatusReport::Aborting { .. } => Ok(()),
            WorkerStatusReport::Idle => Err(Error::StateMismatch {
                expected: format!("building {}", job.id),
                actual: "idle".to_string(),
            }),
        }
    }

    async fn is_available(&self) -> Result<bool> {
        let url = self.endpoint("echo")?;
        // A worker that does not answer is unavailable, not broken; it may
        // come back on its own by the next scan.
        match self.client.get(url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn find_and_start_job(&self) -> Result<Option<JobId>> {
        let mut session = self.store.session().await?;
        let Some(job) = session.claim_next_job(&self.worker).await? else {
            return Ok(None);
        };
        if self.worker.virtualized {
            if let Err(e) = self.resume().await {
                session.abort().await?;
                return Err(e);
            }
        }
        let request = StartBuildRequest {
            job: *job.id.as_uuid(),
        };
        if let Err(e) = self.post("build", Some(&request)).await {
            // Leave the claim uncommitted so the job stays in the pool.
            session.abort().await?;
            return Err(e);
        }
        session.commit().await?;
        Ok(Some(job.id))
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::MalformedResponse(e.to_string())
    } else {
        Error::WorkerUnreachable(e.to_string())
    }
}
