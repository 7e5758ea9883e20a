//! Job Repository
//!
//! Handles all database operations related to jobs. All stages share the
//! `jobs` table; a repository instance is bound to one stage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ort_core::domain::job::{Job, JobStatus};
use ort_core::domain::schedule::WorkerScheduleInfo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use std::marker::PhantomData;

use super::{JobRepository, JobUpdate, RepositoryError, Result};

const JOB_COLUMNS: &str =
    "id, ort_run_id, created_at, started_at, finished_at, configuration, status";

const FINAL_STATUSES: &str = "('FINISHED', 'FINISHED_WITH_ISSUES', 'FAILED')";

/// Jobs of one stage stored in Postgres
pub struct PgJobRepository<C> {
    pool: PgPool,
    stage: WorkerScheduleInfo,
    _configuration: PhantomData<fn() -> C>,
}

impl<C> PgJobRepository<C> {
    pub fn new(pool: PgPool, stage: WorkerScheduleInfo) -> Self {
        Self {
            pool,
            stage,
            _configuration: PhantomData,
        }
    }

    fn stage_name(&self) -> &'static str {
        self.stage.endpoint().name()
    }

    fn not_found(&self, id: i64) -> RepositoryError {
        RepositoryError::NotFound(format!("{} job {}", self.stage, id))
    }
}

#[async_trait]
impl<C> JobRepository<C> for PgJobRepository<C>
where
    C: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, ort_run_id: i64, configuration: C) -> Result<Job<C>> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (ort_run_id, stage, created_at, configuration, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ort_run_id, stage) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(ort_run_id)
        .bind(self.stage_name())
        .bind(now)
        .bind(serde_json::to_value(&configuration)?)
        .bind(JobStatus::Created.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_job(),
            None => Err(RepositoryError::Conflict(format!(
                "run {} already has a {} job",
                ort_run_id, self.stage
            ))),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Job<C>>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND stage = $2"
        ))
        .bind(id)
        .bind(self.stage_name())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    async fn get_for_ort_run(&self, ort_run_id: i64) -> Result<Option<Job<C>>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE ort_run_id = $1 AND stage = $2"
        ))
        .bind(ort_run_id)
        .bind(self.stage_name())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update(&self, id: i64, update: JobUpdate) -> Result<Job<C>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET started_at = COALESCE($1, started_at),
                finished_at = COALESCE($2, finished_at),
                status = COALESCE($3, status)
            WHERE id = $4 AND stage = $5
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(update.started_at)
        .bind(update.finished_at)
        .bind(update.status.map(JobStatus::as_str))
        .bind(id)
        .bind(self.stage_name())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| self.not_found(id))?.into_job()
    }

    async fn update_configuration(&self, id: i64, configuration: C) -> Result<Job<C>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET configuration = $1
            WHERE id = $2 AND stage = $3
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(serde_json::to_value(&configuration)?)
        .bind(id)
        .bind(self.stage_name())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| self.not_found(id))?.into_job()
    }

    async fn mark_scheduled(&self, id: i64) -> Result<Option<Job<C>>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = $1
            WHERE id = $2 AND stage = $3 AND status = $4
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(JobStatus::Scheduled.as_str())
        .bind(id)
        .bind(self.stage_name())
        .bind(JobStatus::Created.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_job().map(Some),
            None => match self.get(id).await? {
                Some(_) => Ok(None),
                None => Err(self.not_found(id)),
            },
        }
    }

    async fn complete(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Job<C>> {
        // The status condition makes concurrent completions race safely:
        // only one of them gets a row back.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = $1, finished_at = $2
            WHERE id = $3 AND stage = $4 AND status NOT IN {FINAL_STATUSES}
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(finished_at)
        .bind(id)
        .bind(self.stage_name())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_job(),
            None => match self.get(id).await? {
                Some(_) => Err(RepositoryError::JobAlreadyCompleted(id)),
                None => Err(self.not_found(id)),
            },
        }
    }

    async fn list_active(&self, created_before: DateTime<Utc>) -> Result<Vec<Job<C>>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE stage = $1 AND status NOT IN {FINAL_STATUSES} AND created_at < $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(self.stage_name())
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND stage = $2")
            .bind(id)
            .bind(self.stage_name())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_found(id));
        }

        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    ort_run_id: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    configuration: serde_json::Value,
    status: String,
}

impl JobRow {
    fn into_job<C: DeserializeOwned>(self) -> Result<Job<C>> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::InvalidData(format!(
                "job {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;

        Ok(Job {
            id: self.id,
            ort_run_id: self.ort_run_id,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            configuration: serde_json::from_value(self.configuration)?,
            status,
        })
    }
}
