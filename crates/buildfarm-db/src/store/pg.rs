//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Transaction};

use buildfarm_core::{JobId, JobInfo, JobStatus, WorkerId, WorkerInfo};

use crate::store::{Store, StoreSession};
use crate::{DbError, DbResult};

/// Store backed by a PostgreSQL pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_worker_names(&self) -> DbResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM workers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn session(&self) -> DbResult<Box<dyn StoreSession>> {
        Ok(Box::new(PgSession {
            pool: self.pool.clone(),
            tx: None,
        }))
    }
}

/// A unit of work over one transaction at a time.
///
/// The first statement after open/commit/abort begins a fresh transaction,
/// so a session stays usable across the several commit points of a scan
/// tick.
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    async fn tx(&mut self) -> DbResult<&mut Transaction<'static, Postgres>> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        Ok(self.tx.as_mut().expect("transaction opened above"))
    }
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: uuid::Uuid,
    name: String,
    url: String,
    healthy: bool,
    failure_count: i32,
    manual: bool,
    virtualized: bool,
    failure_note: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<WorkerRow> for WorkerInfo {
    fn from(row: WorkerRow) -> Self {
        WorkerInfo {
            id: WorkerId::from_uuid(row.id),
            name: row.name,
            url: row.url,
            healthy: row.healthy,
            failure_count: row.failure_count,
            manual: row.manual,
            virtualized: row.virtualized,
            failure_note: row.failure_note,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    status: String,
    failure_count: i32,
    virtualized: bool,
    worker_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobInfo {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e: buildfarm_core::job::UnknownStatus| DbError::Invalid(e.to_string()))?;
        Ok(JobInfo {
            id: JobId::from_uuid(row.id),
            status,
            failure_count: row.failure_count,
            virtualized: row.virtualized,
            worker: row.worker_id.map(WorkerId::from_uuid),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn worker_by_name(&mut self, name: &str) -> DbResult<Option<WorkerInfo>> {
        let tx = self.tx().await?;
        let row = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(WorkerInfo::from))
    }

    async fn current_job(&mut self, worker: WorkerId) -> DbResult<Option<JobInfo>> {
        let tx = self.tx().await?;
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM build_jobs WHERE worker_id = $1 AND status IN ('building', 'uploading')",
        )
        .bind(worker.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;
        row.map(JobInfo::try_from).transpose()
    }

    async fn claim_next_job(&mut self, worker: &WorkerInfo) -> DbResult<Option<JobInfo>> {
        let tx = self.tx().await?;
        // SKIP LOCKED so concurrently dispatching cycles never contend on
        // the same candidate row.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE build_jobs
            SET status = 'building', worker_id = $1, started_at = NOW()
            WHERE id = (
                SELECT id FROM build_jobs
                WHERE status = 'needsbuild' AND virtualized = $2
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, status, failure_count, virtualized, worker_id, created_at
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(worker.virtualized)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(JobInfo::try_from).transpose()
    }

    async fn reset_job(&mut self, job: JobId) -> DbResult<()> {
        let tx = self.tx().await?;
        sqlx::query(
            "UPDATE build_jobs SET status = 'needsbuild', worker_id = NULL, started_at = NULL
             WHERE id = $1",
        )
        .bind(job.as_uuid())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fail_job(&mut self, job: JobId) -> DbResult<()> {
        let tx = self.tx().await?;
        sqlx::query(
            "UPDATE build_jobs SET status = 'failedtobuild', worker_id = NULL WHERE id = $1",
        )
        .bind(job.as_uuid())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn finish_job(&mut self, job: JobId, successful: bool) -> DbResult<()> {
        let status = if successful {
            JobStatus::FullyBuilt
        } else {
            JobStatus::FailedToBuild
        };
        let tx = self.tx().await?;
        sqlx::query("UPDATE build_jobs SET status = $2, worker_id = NULL WHERE id = $1")
            .bind(job.as_uuid())
            .bind(status.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn set_worker_health(
        &mut self,
        worker: WorkerId,
        healthy: bool,
        note: Option<&str>,
    ) -> DbResult<()> {
        let tx = self.tx().await?;
        sqlx::query("UPDATE workers SET healthy = $2, failure_note = $3 WHERE id = $1")
            .bind(worker.as_uuid())
            .bind(healthy)
            .bind(note)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn reset_worker_failures(&mut self, worker: WorkerId) -> DbResult<()> {
        let tx = self.tx().await?;
        sqlx::query("UPDATE workers SET failure_count = 0 WHERE id = $1")
            .bind(worker.as_uuid())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn record_failure(&mut self, worker: WorkerId, job: Option<JobId>) -> DbResult<()> {
        let tx = self.tx().await?;
        sqlx::query("UPDATE workers SET failure_count = failure_count + 1 WHERE id = $1")
            .bind(worker.as_uuid())
            .execute(&mut **tx)
            .await?;
        if let Some(job) = job {
            sqlx::query("UPDATE build_jobs SET failure_count = failure_count + 1 WHERE id = $1")
                .bind(job.as_uuid())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn abort(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
