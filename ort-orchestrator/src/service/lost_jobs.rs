//! Lost jobs finder
//!
//! Workers may die without sending a result or an error. Jobs that stay active
//! for longer than the job timeout are failed through the same path as a
//! worker error reported by the infrastructure.

use chrono::Utc;
use ort_core::domain::schedule::WorkerScheduleInfo;
use ort_core::dto::message::MessageHeader;
use ort_core::dto::orchestrator::WorkerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::service::{Orchestrator, RunLocks};

pub struct LostJobsFinder {
    orchestrator: Arc<Orchestrator>,
    run_locks: RunLocks,
    check_interval: Duration,
    job_timeout: Duration,
}

impl LostJobsFinder {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        run_locks: RunLocks,
        check_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            run_locks,
            check_interval,
            job_timeout,
        }
    }

    /// Check for lost jobs forever
    pub async fn run(&self) {
        info!(
            "Starting lost jobs finder (interval: {:?}, job timeout: {:?})",
            self.check_interval, self.job_timeout
        );

        let mut interval = time::interval(self.check_interval);

        loop {
            interval.tick().await;

            debug!("Looking for lost jobs");

            match self.check_once().await {
                Ok(count) => {
                    if count > 0 {
                        warn!("Failed {} lost job(s)", count);
                    }
                }
                Err(e) => {
                    error!("Error while looking for lost jobs: {}", e);
                }
            }
        }
    }

    /// Fail every job that is active for longer than the job timeout
    ///
    /// Returns the number of jobs handled.
    pub async fn check_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.job_timeout.as_secs() as i64);
        let mut count = 0;

        for stage in WorkerScheduleInfo::ALL {
            let jobs = self
                .orchestrator
                .repositories()
                .stage_jobs(stage)
                .active_jobs_created_before(cutoff)
                .await?;

            for job in jobs {
                warn!(
                    "{} job {} of run {} is {} since {}, assuming it is lost",
                    stage, job.id, job.ort_run_id, job.status, job.created_at
                );

                let header = MessageHeader::new(job.ort_run_id, "");
                let payload = WorkerError {
                    endpoint_name: stage.endpoint().name().to_string(),
                };

                let result = self
                    .run_locks
                    .with_lock(
                        job.ort_run_id,
                        self.orchestrator.handle_worker_error(&header, payload),
                    )
                    .await;

                match result {
                    Ok(()) => count += 1,
                    Err(e) => error!(
                        "Failed to handle lost {} job {} of run {}: {}",
                        stage, job.id, job.ort_run_id, e
                    ),
                }
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ort_core::domain::config::{JobConfigurations, ReporterJobConfiguration};
    use ort_core::domain::job::JobStatus;
    use ort_core::domain::run::{OrtRunStatus, Repository, RepositoryType};
    use ort_core::dto::orchestrator::ConfigWorkerResult;

    use crate::repository::{
        self as repository, InMemoryRepositoryRepository, OrtRunUpdate, Repositories,
    };
    use crate::transport::InMemoryBroker;

    async fn started_run(job_configs: JobConfigurations) -> (Arc<Orchestrator>, i64) {
        let repository_store = Arc::new(InMemoryRepositoryRepository::new());
        repository_store
            .insert(Repository {
                id: 1,
                organization_id: 1,
                product_id: 1,
                repository_type: RepositoryType::Git,
                url: "https://example.org/project.git".to_string(),
            })
            .await;
        let repositories = Repositories::in_memory(repository_store);
        let orchestrator = Arc::new(Orchestrator::new(
            repositories.clone(),
            Arc::new(InMemoryBroker::new()),
        ));

        let run = repositories
            .runs
            .create(repository::CreateOrtRun {
                repository_id: 1,
                revision: "main".to_string(),
                job_configs,
                ..Default::default()
            })
            .await
            .unwrap();
        repositories
            .runs
            .update(run.id, OrtRunUpdate::status(OrtRunStatus::Active))
            .await
            .unwrap();

        orchestrator
            .handle_config_worker_result(
                &MessageHeader::new(run.id, "trace-1"),
                ConfigWorkerResult { ort_run_id: run.id },
            )
            .await
            .unwrap();

        (orchestrator, run.id)
    }

    #[tokio::test]
    async fn test_lost_job_is_failed_and_run_continues() {
        let (orchestrator, run_id) = started_run(JobConfigurations {
            reporter: Some(ReporterJobConfiguration::default()),
            ..Default::default()
        })
        .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let finder = LostJobsFinder::new(
            orchestrator.clone(),
            RunLocks::new(),
            Duration::from_secs(60),
            Duration::ZERO,
        );

        let count = finder.check_once().await.unwrap();
        assert_eq!(count, 1);

        let repositories = orchestrator.repositories();
        let analyzer = repositories
            .stage_jobs(WorkerScheduleInfo::Analyzer)
            .summary_for_ort_run(run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analyzer.status, JobStatus::Failed);

        // The reporter still runs after the failure
        let reporter = repositories
            .stage_jobs(WorkerScheduleInfo::Reporter)
            .summary_for_ort_run(run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reporter.status, JobStatus::Scheduled);

        let run = repositories.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, OrtRunStatus::Active);
        assert_eq!(run.issues.len(), 1);
        assert_eq!(run.issues[0].source, "analyzer");
    }

    #[tokio::test]
    async fn test_recent_jobs_are_not_lost() {
        let (orchestrator, run_id) = started_run(JobConfigurations::default()).await;

        let finder = LostJobsFinder::new(
            orchestrator.clone(),
            RunLocks::new(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        );

        assert_eq!(finder.check_once().await.unwrap(), 0);

        let run = orchestrator
            .repositories()
            .runs
            .get(run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, OrtRunStatus::Active);
    }
}
