//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles the records of one domain entity. The orchestrator
//! only talks to the traits defined here, so Postgres and in-memory storage
//! are interchangeable.

pub mod job;
pub mod memory;
pub mod run;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ort_core::domain::config::{
    AdvisorJobConfiguration, AnalyzerJobConfiguration, EvaluatorJobConfiguration,
    JobConfigurations, NotifierJobConfiguration, ReporterJobConfiguration,
    ScannerJobConfiguration,
};
use ort_core::domain::job::{Job, JobStatus};
use ort_core::domain::run::{Issue, OrtRun, OrtRunStatus, Repository};
use ort_core::domain::schedule::WorkerScheduleInfo;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use job::PgJobRepository;
pub use memory::{InMemoryJobRepository, InMemoryRepositoryRepository, InMemoryRunRepository};
pub use run::{PgRepositoryRepository, PgRunRepository};

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job {0} is already completed")]
    JobAlreadyCompleted(i64),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// Whether the failure lies in the storage rather than in the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Database(_))
    }
}

/// Changes to apply to a job. `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<JobStatus>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Persistence of the jobs of one stage
#[async_trait]
pub trait JobRepository<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Create a job in status `CREATED`
    ///
    /// Fails with [`RepositoryError::Conflict`] if the run already has a job
    /// for this stage.
    async fn create(&self, ort_run_id: i64, configuration: C) -> Result<Job<C>>;

    async fn get(&self, id: i64) -> Result<Option<Job<C>>>;

    /// The job of this stage belonging to the given run
    async fn get_for_ort_run(&self, ort_run_id: i64) -> Result<Option<Job<C>>>;

    async fn update(&self, id: i64, update: JobUpdate) -> Result<Job<C>>;

    async fn update_configuration(&self, id: i64, configuration: C) -> Result<Job<C>>;

    /// Mark a job as `SCHEDULED` if it is still `CREATED`
    ///
    /// Returns `None` if the job already moved on, for example because the
    /// worker picked it up before the orchestrator got to mark it.
    async fn mark_scheduled(&self, id: i64) -> Result<Option<Job<C>>>;

    /// Move a job into a final state
    ///
    /// Fails with [`RepositoryError::JobAlreadyCompleted`] if the job already is
    /// in a final state, leaving it untouched. Callers decide whether that is
    /// an error or an expected duplicate.
    async fn complete(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Job<C>>;

    /// Jobs not in a final state that were created before `created_before`
    async fn list_active(&self, created_before: DateTime<Utc>) -> Result<Vec<Job<C>>>;

    async fn delete(&self, id: i64) -> Result<()>;
}

/// The configuration-independent part of a job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSummary {
    pub id: i64,
    pub ort_run_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
}

impl<C> From<&Job<C>> for JobSummary {
    fn from(job: &Job<C>) -> Self {
        Self {
            id: job.id,
            ort_run_id: job.ort_run_id,
            created_at: job.created_at,
            status: job.status,
        }
    }
}

/// Stage-agnostic view of a [`JobRepository`]
///
/// Lets the orchestrator handle status transitions the same way for every
/// stage. Only creating jobs needs the concrete configuration type.
#[async_trait]
pub trait StageJobs: Send + Sync {
    async fn summary(&self, id: i64) -> Result<Option<JobSummary>>;

    async fn summary_for_ort_run(&self, ort_run_id: i64) -> Result<Option<JobSummary>>;

    async fn update_status(&self, id: i64, status: JobStatus) -> Result<JobSummary>;

    async fn mark_job_scheduled(&self, id: i64) -> Result<Option<JobSummary>>;

    async fn complete_job(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<JobSummary>;

    async fn active_jobs_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobSummary>>;
}

#[async_trait]
impl<C> StageJobs for Arc<dyn JobRepository<C>>
where
    C: Send + Sync + 'static,
{
    async fn summary(&self, id: i64) -> Result<Option<JobSummary>> {
        Ok(self.get(id).await?.as_ref().map(JobSummary::from))
    }

    async fn summary_for_ort_run(&self, ort_run_id: i64) -> Result<Option<JobSummary>> {
        Ok(self
            .get_for_ort_run(ort_run_id)
            .await?
            .as_ref()
            .map(JobSummary::from))
    }

    async fn update_status(&self, id: i64, status: JobStatus) -> Result<JobSummary> {
        let job = self.update(id, JobUpdate::status(status)).await?;
        Ok(JobSummary::from(&job))
    }

    async fn mark_job_scheduled(&self, id: i64) -> Result<Option<JobSummary>> {
        Ok(self.mark_scheduled(id).await?.as_ref().map(JobSummary::from))
    }

    async fn complete_job(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<JobSummary> {
        let job = self.complete(id, finished_at, status).await?;
        Ok(JobSummary::from(&job))
    }

    async fn active_jobs_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobSummary>> {
        Ok(self
            .list_active(cutoff)
            .await?
            .iter()
            .map(JobSummary::from)
            .collect())
    }
}

/// Data for a new run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOrtRun {
    pub repository_id: i64,
    pub revision: String,
    pub path: Option<String>,
    pub job_configs: JobConfigurations,
    pub labels: HashMap<String, String>,
    pub trace_id: Option<String>,
}

/// Changes to apply to a run
///
/// `None` leaves a field untouched. Issues are appended to the existing ones,
/// labels are merged into the existing ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrtRunUpdate {
    pub status: Option<OrtRunStatus>,
    pub job_configs: Option<JobConfigurations>,
    pub resolved_job_configs: Option<JobConfigurations>,
    pub resolved_job_config_context: Option<String>,
    pub issues: Vec<Issue>,
    pub labels: HashMap<String, String>,
}

impl OrtRunUpdate {
    pub fn status(status: OrtRunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the update to an in-memory run
    pub fn apply_to(self, run: &mut OrtRun, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            run.status = status;
            if status.is_final() && run.finished_at.is_none() {
                run.finished_at = Some(now);
            }
        }
        if let Some(job_configs) = self.job_configs {
            run.job_configs = job_configs;
        }
        if let Some(resolved) = self.resolved_job_configs {
            run.resolved_job_configs = Some(resolved);
        }
        if let Some(context) = self.resolved_job_config_context {
            run.resolved_job_config_context = Some(context);
        }
        run.issues.extend(self.issues);
        run.labels.extend(self.labels);
    }
}

/// Paging for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQueryParameters {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQueryParameters {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

/// Persistence of runs
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<OrtRun>>;

    /// A run by its per-repository index
    async fn get_by_index(&self, repository_id: i64, index: i64) -> Result<Option<OrtRun>>;

    /// Runs of a repository, ordered by index
    async fn list_for_repository(
        &self,
        repository_id: i64,
        parameters: ListQueryParameters,
    ) -> Result<Vec<OrtRun>>;

    /// Create a run in status `CREATED` with the next free index
    async fn create(&self, run: CreateOrtRun) -> Result<OrtRun>;

    async fn update(&self, id: i64, update: OrtRunUpdate) -> Result<OrtRun>;

    async fn delete(&self, id: i64) -> Result<()>;
}

/// Lookup of the repositories runs are executed for
#[async_trait]
pub trait RepositoryRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Repository>>;
}

/// All repositories the orchestrator works with
#[derive(Clone)]
pub struct Repositories {
    pub analyzer_jobs: Arc<dyn JobRepository<AnalyzerJobConfiguration>>,
    pub advisor_jobs: Arc<dyn JobRepository<AdvisorJobConfiguration>>,
    pub scanner_jobs: Arc<dyn JobRepository<ScannerJobConfiguration>>,
    pub evaluator_jobs: Arc<dyn JobRepository<EvaluatorJobConfiguration>>,
    pub reporter_jobs: Arc<dyn JobRepository<ReporterJobConfiguration>>,
    pub notifier_jobs: Arc<dyn JobRepository<NotifierJobConfiguration>>,
    pub runs: Arc<dyn RunRepository>,
    pub repositories: Arc<dyn RepositoryRepository>,
}

impl Repositories {
    /// Repositories backed by a Postgres database
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            analyzer_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Analyzer,
            )),
            advisor_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Advisor,
            )),
            scanner_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Scanner,
            )),
            evaluator_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Evaluator,
            )),
            reporter_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Reporter,
            )),
            notifier_jobs: Arc::new(PgJobRepository::new(
                pool.clone(),
                WorkerScheduleInfo::Notifier,
            )),
            runs: Arc::new(PgRunRepository::new(pool.clone())),
            repositories: Arc::new(PgRepositoryRepository::new(pool)),
        }
    }

    /// Repositories keeping everything in memory
    pub fn in_memory(repositories: Arc<InMemoryRepositoryRepository>) -> Self {
        Self {
            analyzer_jobs: Arc::new(InMemoryJobRepository::<AnalyzerJobConfiguration>::new()),
            advisor_jobs: Arc::new(InMemoryJobRepository::<AdvisorJobConfiguration>::new()),
            scanner_jobs: Arc::new(InMemoryJobRepository::<ScannerJobConfiguration>::new()),
            evaluator_jobs: Arc::new(InMemoryJobRepository::<EvaluatorJobConfiguration>::new()),
            reporter_jobs: Arc::new(InMemoryJobRepository::<ReporterJobConfiguration>::new()),
            notifier_jobs: Arc::new(InMemoryJobRepository::<NotifierJobConfiguration>::new()),
            runs: Arc::new(InMemoryRunRepository::new()),
            repositories,
        }
    }

    /// The status view of the job repository of a stage
    pub fn stage_jobs(&self, stage: WorkerScheduleInfo) -> &dyn StageJobs {
        match stage {
            WorkerScheduleInfo::Analyzer => &self.analyzer_jobs,
            WorkerScheduleInfo::Advisor => &self.advisor_jobs,
            WorkerScheduleInfo::Scanner => &self.scanner_jobs,
            WorkerScheduleInfo::Evaluator => &self.evaluator_jobs,
            WorkerScheduleInfo::Reporter => &self.reporter_jobs,
            WorkerScheduleInfo::Notifier => &self.notifier_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ort_core::domain::config::ReporterJobConfiguration;

    fn run() -> OrtRun {
        OrtRun {
            id: 1,
            index: 1,
            repository_id: 1,
            revision: "main".to_string(),
            path: None,
            created_at: Utc::now(),
            finished_at: None,
            job_configs: JobConfigurations::default(),
            resolved_job_configs: None,
            resolved_job_config_context: None,
            status: OrtRunStatus::Active,
            labels: HashMap::from([("team".to_string(), "a".to_string())]),
            issues: vec![Issue::error("config", "first")],
            trace_id: None,
        }
    }

    #[test]
    fn test_update_appends_issues_and_merges_labels() {
        let mut run = run();
        let update = OrtRunUpdate {
            labels: HashMap::from([("team".to_string(), "b".to_string())]),
            ..OrtRunUpdate::default()
        }
        .with_issue(Issue::error("scanner", "second"));

        update.apply_to(&mut run, Utc::now());

        assert_eq!(run.issues.len(), 2);
        assert_eq!(run.issues[1].source, "scanner");
        assert_eq!(run.labels.get("team"), Some(&"b".to_string()));
        assert_eq!(run.status, OrtRunStatus::Active);
    }

    #[test]
    fn test_final_status_sets_finished_at_once() {
        let mut run = run();
        let first = Utc::now();

        OrtRunUpdate::status(OrtRunStatus::Failed).apply_to(&mut run, first);
        OrtRunUpdate::status(OrtRunStatus::Failed)
            .apply_to(&mut run, first + chrono::Duration::seconds(5));

        assert_eq!(run.finished_at, Some(first));
    }

    #[test]
    fn test_resolved_configs_replace_previous() {
        let mut run = run();
        let update = OrtRunUpdate {
            resolved_job_configs: Some(JobConfigurations {
                reporter: Some(ReporterJobConfiguration::default()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(!update.is_empty());
        update.apply_to(&mut run, Utc::now());
        assert!(run.effective_job_configs().reporter.is_some());
    }

    #[test]
    fn test_only_database_errors_are_retryable() {
        assert!(RepositoryError::Database(sqlx::Error::PoolClosed).is_retryable());
        assert!(!RepositoryError::NotFound("run 1".to_string()).is_retryable());
        assert!(!RepositoryError::Conflict("dup".to_string()).is_retryable());
        assert!(!RepositoryError::JobAlreadyCompleted(1).is_retryable());
    }
}
