//! Run Repository
//!
//! Handles all database operations related to runs and the repositories
//! they analyze.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ort_core::domain::run::{OrtRun, OrtRunStatus, Repository, RepositoryType};
use sqlx::PgPool;

use super::{
    CreateOrtRun, ListQueryParameters, OrtRunUpdate, RepositoryError, RepositoryRepository,
    Result, RunRepository,
};

const RUN_COLUMNS: &str = r#"
    id, index, repository_id, revision, path, created_at, finished_at,
    job_configs, resolved_job_configs, resolved_job_config_context,
    status, labels, issues, trace_id
"#;

/// Runs stored in Postgres
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn get(&self, id: i64) -> Result<Option<OrtRun>> {
        let row = sqlx::query_as::<_, OrtRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM ort_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrtRunRow::into_run).transpose()
    }

    async fn get_by_index(&self, repository_id: i64, index: i64) -> Result<Option<OrtRun>> {
        let row = sqlx::query_as::<_, OrtRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM ort_runs WHERE repository_id = $1 AND index = $2"
        ))
        .bind(repository_id)
        .bind(index)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrtRunRow::into_run).transpose()
    }

    async fn list_for_repository(
        &self,
        repository_id: i64,
        parameters: ListQueryParameters,
    ) -> Result<Vec<OrtRun>> {
        let rows = sqlx::query_as::<_, OrtRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM ort_runs
            WHERE repository_id = $1
            ORDER BY index ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(repository_id)
        .bind(parameters.limit as i64)
        .bind(parameters.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrtRunRow::into_run).collect()
    }

    async fn create(&self, run: CreateOrtRun) -> Result<OrtRun> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, OrtRunRow>(&format!(
            r#"
            INSERT INTO ort_runs (
                index, repository_id, revision, path, created_at,
                job_configs, status, labels, issues, trace_id
            )
            SELECT COALESCE(MAX(index), 0) + 1, $1, $2, $3, $4, $5, $6, $7, '[]'::jsonb, $8
            FROM ort_runs
            WHERE repository_id = $1
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run.repository_id)
        .bind(&run.revision)
        .bind(&run.path)
        .bind(now)
        .bind(serde_json::to_value(&run.job_configs)?)
        .bind(OrtRunStatus::Created.as_str())
        .bind(serde_json::to_value(&run.labels)?)
        .bind(&run.trace_id)
        .fetch_one(&self.pool)
        .await?;

        row.into_run()
    }

    async fn update(&self, id: i64, update: OrtRunUpdate) -> Result<OrtRun> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrtRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM ort_runs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("run {}", id)))?;

        let mut run = row.into_run()?;
        update.apply_to(&mut run, Utc::now());

        sqlx::query(
            r#"
            UPDATE ort_runs
            SET status = $1, finished_at = $2, job_configs = $3, resolved_job_configs = $4,
                resolved_job_config_context = $5, labels = $6, issues = $7
            WHERE id = $8
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.finished_at)
        .bind(serde_json::to_value(&run.job_configs)?)
        .bind(
            run.resolved_job_configs
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(&run.resolved_job_config_context)
        .bind(serde_json::to_value(&run.labels)?)
        .bind(serde_json::to_value(&run.issues)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(run)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM ort_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("run {}", id)));
        }

        Ok(())
    }
}

/// Repositories stored in Postgres
pub struct PgRepositoryRepository {
    pool: PgPool,
}

impl PgRepositoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryRepository for PgRepositoryRepository {
    async fn get(&self, id: i64) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT id, organization_id, product_id, type, url
            FROM repositories
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RepositoryRow::into_repository).transpose()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrtRunRow {
    id: i64,
    index: i64,
    repository_id: i64,
    revision: String,
    path: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    job_configs: serde_json::Value,
    resolved_job_configs: Option<serde_json::Value>,
    resolved_job_config_context: Option<String>,
    status: String,
    labels: serde_json::Value,
    issues: serde_json::Value,
    trace_id: Option<String>,
}

impl OrtRunRow {
    fn into_run(self) -> Result<OrtRun> {
        let status = OrtRunStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::InvalidData(format!(
                "run {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;

        Ok(OrtRun {
            id: self.id,
            index: self.index,
            repository_id: self.repository_id,
            revision: self.revision,
            path: self.path,
            created_at: self.created_at,
            finished_at: self.finished_at,
            job_configs: serde_json::from_value(self.job_configs)?,
            resolved_job_configs: self
                .resolved_job_configs
                .map(serde_json::from_value)
                .transpose()?,
            resolved_job_config_context: self.resolved_job_config_context,
            status,
            labels: serde_json::from_value(self.labels)?,
            issues: serde_json::from_value(self.issues)?,
            trace_id: self.trace_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: i64,
    organization_id: i64,
    product_id: i64,
    #[sqlx(rename = "type")]
    repository_type: String,
    url: String,
}

impl RepositoryRow {
    fn into_repository(self) -> Result<Repository> {
        let repository_type = RepositoryType::parse(&self.repository_type).ok_or_else(|| {
            RepositoryError::InvalidData(format!(
                "repository {} has unknown type '{}'",
                self.id, self.repository_type
            ))
        })?;

        Ok(Repository {
            id: self.id,
            organization_id: self.organization_id,
            product_id: self.product_id,
            repository_type,
            url: self.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> OrtRunRow {
        OrtRunRow {
            id: 3,
            index: 2,
            repository_id: 1,
            revision: "main".to_string(),
            path: Some("sub".to_string()),
            created_at: Utc::now(),
            finished_at: None,
            job_configs: json!({"scanner": {"scanners": ["ScanCode"]}}),
            resolved_job_configs: None,
            resolved_job_config_context: None,
            status: "ACTIVE".to_string(),
            labels: json!({"transport:kubernetes.cpu": "2"}),
            issues: json!([]),
            trace_id: Some("trace".to_string()),
        }
    }

    #[test]
    fn test_run_row_conversion() {
        let run = row().into_run().unwrap();

        assert_eq!(run.status, OrtRunStatus::Active);
        assert_eq!(
            run.job_configs.scanner.as_ref().map(|s| s.scanners.clone()),
            Some(vec!["ScanCode".to_string()])
        );
        assert!(run.resolved_job_configs.is_none());
        assert_eq!(run.transport_properties().get("kubernetes.cpu"), Some(&"2".to_string()));
    }

    #[test]
    fn test_run_row_with_unknown_status() {
        let mut row = row();
        row.status = "RUNNING".to_string();
        assert!(matches!(row.into_run(), Err(RepositoryError::InvalidData(_))));
    }

    #[test]
    fn test_repository_row_conversion() {
        let row = RepositoryRow {
            id: 1,
            organization_id: 2,
            product_id: 3,
            repository_type: "GIT".to_string(),
            url: "https://example.org/repo.git".to_string(),
        };

        let repository = row.into_repository().unwrap();
        assert_eq!(repository.repository_type, RepositoryType::Git);
    }
}
