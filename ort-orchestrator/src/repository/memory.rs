//! In-memory repositories
//!
//! Used by the tests and by the `memory` storage mode. State lives as long as
//! the repository instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ort_core::domain::job::{Job, JobStatus};
use ort_core::domain::run::{OrtRun, OrtRunStatus, Repository};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{
    CreateOrtRun, JobRepository, JobUpdate, ListQueryParameters, OrtRunUpdate, RepositoryError,
    RepositoryRepository, Result, RunRepository,
};

struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Jobs of one stage kept in memory
pub struct InMemoryJobRepository<C> {
    jobs: Mutex<Table<Job<C>>>,
}

impl<C> InMemoryJobRepository<C> {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Table::new()),
        }
    }
}

impl<C> Default for InMemoryJobRepository<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn job_not_found(id: i64) -> RepositoryError {
    RepositoryError::NotFound(format!("job {}", id))
}

#[async_trait]
impl<C> JobRepository<C> for InMemoryJobRepository<C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn create(&self, ort_run_id: i64, configuration: C) -> Result<Job<C>> {
        let mut jobs = self.jobs.lock().await;

        if jobs.rows.values().any(|job| job.ort_run_id == ort_run_id) {
            return Err(RepositoryError::Conflict(format!(
                "run {} already has a job for this stage",
                ort_run_id
            )));
        }

        let job = Job {
            id: jobs.next_id(),
            ort_run_id,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            configuration,
            status: JobStatus::Created,
        };
        jobs.rows.insert(job.id, job.clone());

        Ok(job)
    }

    async fn get(&self, id: i64) -> Result<Option<Job<C>>> {
        Ok(self.jobs.lock().await.rows.get(&id).cloned())
    }

    async fn get_for_ort_run(&self, ort_run_id: i64) -> Result<Option<Job<C>>> {
        Ok(self
            .jobs
            .lock()
            .await
            .rows
            .values()
            .find(|job| job.ort_run_id == ort_run_id)
            .cloned())
    }

    async fn update(&self, id: i64, update: JobUpdate) -> Result<Job<C>> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.rows.get_mut(&id).ok_or_else(|| job_not_found(id))?;

        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(finished_at) = update.finished_at {
            job.finished_at = Some(finished_at);
        }
        if let Some(status) = update.status {
            job.status = status;
        }

        Ok(job.clone())
    }

    async fn update_configuration(&self, id: i64, configuration: C) -> Result<Job<C>> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.rows.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.configuration = configuration;
        Ok(job.clone())
    }

    async fn mark_scheduled(&self, id: i64) -> Result<Option<Job<C>>> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.rows.get_mut(&id).ok_or_else(|| job_not_found(id))?;

        if job.status != JobStatus::Created {
            return Ok(None);
        }

        job.status = JobStatus::Scheduled;
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Job<C>> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.rows.get_mut(&id).ok_or_else(|| job_not_found(id))?;

        if job.is_completed() {
            return Err(RepositoryError::JobAlreadyCompleted(id));
        }

        job.finished_at = Some(finished_at);
        job.status = status;
        Ok(job.clone())
    }

    async fn list_active(&self, created_before: DateTime<Utc>) -> Result<Vec<Job<C>>> {
        Ok(self
            .jobs
            .lock()
            .await
            .rows
            .values()
            .filter(|job| !job.is_completed() && job.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.jobs
            .lock()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| job_not_found(id))
    }
}

/// Runs kept in memory
pub struct InMemoryRunRepository {
    runs: Mutex<Table<OrtRun>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Table::new()),
        }
    }
}

impl Default for InMemoryRunRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn run_not_found(id: i64) -> RepositoryError {
    RepositoryError::NotFound(format!("run {}", id))
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn get(&self, id: i64) -> Result<Option<OrtRun>> {
        Ok(self.runs.lock().await.rows.get(&id).cloned())
    }

    async fn get_by_index(&self, repository_id: i64, index: i64) -> Result<Option<OrtRun>> {
        Ok(self
            .runs
            .lock()
            .await
            .rows
            .values()
            .find(|run| run.repository_id == repository_id && run.index == index)
            .cloned())
    }

    async fn list_for_repository(
        &self,
        repository_id: i64,
        parameters: ListQueryParameters,
    ) -> Result<Vec<OrtRun>> {
        let runs = self.runs.lock().await;
        let mut result: Vec<OrtRun> = runs
            .rows
            .values()
            .filter(|run| run.repository_id == repository_id)
            .cloned()
            .collect();
        result.sort_by_key(|run| run.index);

        Ok(result
            .into_iter()
            .skip(parameters.offset)
            .take(parameters.limit)
            .collect())
    }

    async fn create(&self, create: CreateOrtRun) -> Result<OrtRun> {
        let mut runs = self.runs.lock().await;

        let index = runs
            .rows
            .values()
            .filter(|run| run.repository_id == create.repository_id)
            .map(|run| run.index)
            .max()
            .unwrap_or(0)
            + 1;

        let run = OrtRun {
            id: runs.next_id(),
            index,
            repository_id: create.repository_id,
            revision: create.revision,
            path: create.path,
            created_at: Utc::now(),
            finished_at: None,
            job_configs: create.job_configs,
            resolved_job_configs: None,
            resolved_job_config_context: None,
            status: OrtRunStatus::Created,
            labels: create.labels,
            issues: Vec::new(),
            trace_id: create.trace_id,
        };
        runs.rows.insert(run.id, run.clone());

        Ok(run)
    }

    async fn update(&self, id: i64, update: OrtRunUpdate) -> Result<OrtRun> {
        let mut runs = self.runs.lock().await;
        let run = runs.rows.get_mut(&id).ok_or_else(|| run_not_found(id))?;
        update.apply_to(run, Utc::now());
        Ok(run.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.runs
            .lock()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| run_not_found(id))
    }
}

/// Repositories kept in memory, filled by [`InMemoryRepositoryRepository::insert`]
pub struct InMemoryRepositoryRepository {
    repositories: Mutex<BTreeMap<i64, Repository>>,
}

impl InMemoryRepositoryRepository {
    pub fn new() -> Self {
        Self {
            repositories: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn insert(&self, repository: Repository) {
        self.repositories
            .lock()
            .await
            .insert(repository.id, repository);
    }
}

impl Default for InMemoryRepositoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepositoryRepository for InMemoryRepositoryRepository {
    async fn get(&self, id: i64) -> Result<Option<Repository>> {
        Ok(self.repositories.lock().await.get(&id).cloned())
    }
}
