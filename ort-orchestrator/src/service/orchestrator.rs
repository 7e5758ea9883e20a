//! Orchestrator Service
//!
//! Drives runs through the pipeline. Every handler reads the current state
//! from the repositories, applies one transition, and publishes the requests
//! for the stages that became eligible. Nothing is cached between messages.
//!
//! State is always persisted before a request is published. A job is created
//! in `CREATED`, its request is published, and only then it is marked
//! `SCHEDULED`. If publishing fails the error propagates, the message is
//! delivered again, and the re-evaluation publishes the jobs still left in
//! `CREATED`.

use chrono::Utc;
use ort_core::domain::config::JobConfigurations;
use ort_core::domain::job::JobStatus;
use ort_core::domain::run::{Issue, OrtRun, OrtRunStatus};
use ort_core::domain::schedule::{Endpoint, WorkerScheduleInfo};
use ort_core::dto::message::{Message, MessageHeader};
use ort_core::dto::orchestrator::{
    AdvisorWorkerError, AdvisorWorkerResult, AnalyzerWorkerError, AnalyzerWorkerResult,
    ConfigWorkerError, ConfigWorkerResult, CreateOrtRun, EvaluatorWorkerError,
    EvaluatorWorkerResult, NotifierWorkerError, NotifierWorkerResult, OrchestratorMessage,
    ReporterWorkerError, ReporterWorkerResult, ScannerWorkerError, ScannerWorkerResult,
    WorkerError,
};
use ort_core::dto::worker::{ConfigRequest, WorkerRequest};
use ort_core::run_info::{JobInfo, OrtRunInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::repository::{JobSummary, OrtRunUpdate, Repositories, RepositoryError};
use crate::transport::MessagePublisher;

pub struct Orchestrator {
    repositories: Repositories,
    publisher: Arc<dyn MessagePublisher>,
}

impl Orchestrator {
    pub fn new(repositories: Repositories, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            repositories,
            publisher,
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// Dispatch a message to its handler
    pub async fn handle(&self, message: Message<OrchestratorMessage>) -> Result<()> {
        let Message { header, payload } = message;

        match payload {
            OrchestratorMessage::CreateOrtRun(p) => self.handle_create_ort_run(&header, p).await,
            OrchestratorMessage::ConfigWorkerResult(p) => {
                self.handle_config_worker_result(&header, p).await
            }
            OrchestratorMessage::ConfigWorkerError(p) => self.handle_config_worker_error(p).await,
            OrchestratorMessage::AnalyzerWorkerResult(p) => {
                self.handle_analyzer_worker_result(&header, p).await
            }
            OrchestratorMessage::AnalyzerWorkerError(p) => {
                self.handle_analyzer_worker_error(&header, p).await
            }
            OrchestratorMessage::AdvisorWorkerResult(p) => {
                self.handle_advisor_worker_result(&header, p).await
            }
            OrchestratorMessage::AdvisorWorkerError(p) => {
                self.handle_advisor_worker_error(&header, p).await
            }
            OrchestratorMessage::ScannerWorkerResult(p) => {
                self.handle_scanner_worker_result(&header, p).await
            }
            OrchestratorMessage::ScannerWorkerError(p) => {
                self.handle_scanner_worker_error(&header, p).await
            }
            OrchestratorMessage::EvaluatorWorkerResult(p) => {
                self.handle_evaluator_worker_result(&header, p).await
            }
            OrchestratorMessage::EvaluatorWorkerError(p) => {
                self.handle_evaluator_worker_error(&header, p).await
            }
            OrchestratorMessage::ReporterWorkerResult(p) => {
                self.handle_reporter_worker_result(&header, p).await
            }
            OrchestratorMessage::ReporterWorkerError(p) => {
                self.handle_reporter_worker_error(&header, p).await
            }
            OrchestratorMessage::NotifierWorkerResult(p) => {
                self.handle_notifier_worker_result(&header, p).await
            }
            OrchestratorMessage::NotifierWorkerError(p) => {
                self.handle_notifier_worker_error(&header, p).await
            }
            OrchestratorMessage::WorkerError(p) => self.handle_worker_error(&header, p).await,
        }
    }

    // =========================================================================
    // Config stage
    // =========================================================================

    /// Start a new run by requesting its configuration
    pub async fn handle_create_ort_run(
        &self,
        header: &MessageHeader,
        payload: CreateOrtRun,
    ) -> Result<()> {
        let run = self.get_run(payload.ort_run_id).await?;

        if run.status == OrtRunStatus::Active && self.awaits_config(&run).await? {
            // A previous delivery activated the run but did not get the
            // request out.
            warn!(
                "Run {} is already active without configuration, requesting it again (trace: {})",
                run.id, header.trace_id
            );
            return self.request_config(header, &run).await;
        }

        if run.status != OrtRunStatus::Created {
            warn!(
                "Ignoring CreateOrtRun for run {} in status {} (trace: {})",
                run.id, run.status, header.trace_id
            );
            return Ok(());
        }

        if self
            .repositories
            .repositories
            .get(run.repository_id)
            .await?
            .is_none()
        {
            error!(
                "Repository {} of run {} not found, failing the run",
                run.repository_id, run.id
            );
            let issue = Issue::error(
                Endpoint::Orchestrator.name(),
                format!("Repository {} not found", run.repository_id),
            );
            self.repositories
                .runs
                .update(
                    run.id,
                    OrtRunUpdate::status(OrtRunStatus::Failed).with_issue(issue),
                )
                .await?;
            return Ok(());
        }

        let run = self
            .repositories
            .runs
            .update(run.id, OrtRunUpdate::status(OrtRunStatus::Active))
            .await?;

        info!("Run {} is active (trace: {})", run.id, header.trace_id);

        self.request_config(header, &run).await
    }

    /// Schedule the first stages once the configuration is resolved
    pub async fn handle_config_worker_result(
        &self,
        header: &MessageHeader,
        payload: ConfigWorkerResult,
    ) -> Result<()> {
        info!(
            "Config worker finished for run {} (trace: {})",
            payload.ort_run_id, header.trace_id
        );

        self.schedule_next_jobs(header, payload.ort_run_id).await
    }

    pub async fn handle_config_worker_error(&self, payload: ConfigWorkerError) -> Result<()> {
        self.fail_config(payload.ort_run_id, "The config worker reported an error")
            .await
    }

    // =========================================================================
    // Stage results and errors
    // =========================================================================

    pub async fn handle_analyzer_worker_result(
        &self,
        header: &MessageHeader,
        payload: AnalyzerWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(
            header,
            WorkerScheduleInfo::Analyzer,
            payload.job_id,
            payload.has_issues,
        )
        .await
    }

    pub async fn handle_analyzer_worker_error(
        &self,
        header: &MessageHeader,
        payload: AnalyzerWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Analyzer, payload.job_id)
            .await
    }

    pub async fn handle_advisor_worker_result(
        &self,
        header: &MessageHeader,
        payload: AdvisorWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(
            header,
            WorkerScheduleInfo::Advisor,
            payload.job_id,
            payload.has_issues,
        )
        .await
    }

    pub async fn handle_advisor_worker_error(
        &self,
        header: &MessageHeader,
        payload: AdvisorWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Advisor, payload.job_id)
            .await
    }

    pub async fn handle_scanner_worker_result(
        &self,
        header: &MessageHeader,
        payload: ScannerWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(
            header,
            WorkerScheduleInfo::Scanner,
            payload.job_id,
            payload.has_issues,
        )
        .await
    }

    pub async fn handle_scanner_worker_error(
        &self,
        header: &MessageHeader,
        payload: ScannerWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Scanner, payload.job_id)
            .await
    }

    pub async fn handle_evaluator_worker_result(
        &self,
        header: &MessageHeader,
        payload: EvaluatorWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(
            header,
            WorkerScheduleInfo::Evaluator,
            payload.job_id,
            payload.has_issues,
        )
        .await
    }

    pub async fn handle_evaluator_worker_error(
        &self,
        header: &MessageHeader,
        payload: EvaluatorWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Evaluator, payload.job_id)
            .await
    }

    pub async fn handle_reporter_worker_result(
        &self,
        header: &MessageHeader,
        payload: ReporterWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(
            header,
            WorkerScheduleInfo::Reporter,
            payload.job_id,
            payload.has_issues,
        )
        .await
    }

    pub async fn handle_reporter_worker_error(
        &self,
        header: &MessageHeader,
        payload: ReporterWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Reporter, payload.job_id)
            .await
    }

    pub async fn handle_notifier_worker_result(
        &self,
        header: &MessageHeader,
        payload: NotifierWorkerResult,
    ) -> Result<()> {
        self.handle_stage_result(header, WorkerScheduleInfo::Notifier, payload.job_id, false)
            .await
    }

    pub async fn handle_notifier_worker_error(
        &self,
        header: &MessageHeader,
        payload: NotifierWorkerError,
    ) -> Result<()> {
        self.handle_stage_error(header, WorkerScheduleInfo::Notifier, payload.job_id)
            .await
    }

    /// Fail the job of the endpoint's stage for the run in the header
    ///
    /// Sent when a worker died or timed out, possibly more than once for the
    /// same job. A job that already reached a final state keeps it. The run is
    /// still re-evaluated, so a delivery that failed halfway is completed by
    /// the next one.
    pub async fn handle_worker_error(
        &self,
        header: &MessageHeader,
        payload: WorkerError,
    ) -> Result<()> {
        let endpoint = Endpoint::from_name(&payload.endpoint_name)
            .ok_or_else(|| OrchestratorError::UnknownEndpoint(payload.endpoint_name.clone()))?;

        if endpoint == Endpoint::Config {
            return self
                .fail_config(header.ort_run_id, "The config worker failed unexpectedly")
                .await;
        }

        let stage = WorkerScheduleInfo::for_endpoint(endpoint)
            .ok_or_else(|| OrchestratorError::UnknownEndpoint(payload.endpoint_name.clone()))?;
        let jobs = self.repositories.stage_jobs(stage);

        let Some(job) = jobs.summary_for_ort_run(header.ort_run_id).await? else {
            warn!(
                "Worker error for endpoint '{}' but run {} has no {} job",
                endpoint, header.ort_run_id, stage
            );
            return Ok(());
        };

        let failure = format!("The {} worker failed unexpectedly", stage);

        let job = match jobs
            .complete_job(job.id, Utc::now(), JobStatus::Failed)
            .await
        {
            Ok(job) => {
                error!(
                    "The {} worker of run {} failed, {} job {} is FAILED (trace: {})",
                    stage, job.ort_run_id, stage, job.id, header.trace_id
                );
                job
            }
            Err(RepositoryError::JobAlreadyCompleted(_)) => {
                warn!(
                    "{} job {} of run {} is already {}, re-evaluating the run",
                    stage, job.id, job.ort_run_id, job.status
                );
                if job.status != JobStatus::Failed {
                    return self.schedule_next_jobs(header, job.ort_run_id).await;
                }
                job
            }
            Err(e) => return Err(e.into()),
        };

        self.after_job_completed(header, stage, job, Some(failure))
            .await
    }

    async fn handle_stage_result(
        &self,
        header: &MessageHeader,
        stage: WorkerScheduleInfo,
        job_id: i64,
        has_issues: bool,
    ) -> Result<()> {
        let status = if has_issues {
            JobStatus::FinishedWithIssues
        } else {
            JobStatus::Finished
        };

        let job = self.complete_stage_job(header, stage, job_id, status).await?;
        self.after_job_completed(header, stage, job, None).await
    }

    async fn handle_stage_error(
        &self,
        header: &MessageHeader,
        stage: WorkerScheduleInfo,
        job_id: i64,
    ) -> Result<()> {
        let job = self
            .complete_stage_job(header, stage, job_id, JobStatus::Failed)
            .await?;

        self.after_job_completed(
            header,
            stage,
            job,
            Some(format!("The {} worker reported an error", stage)),
        )
        .await
    }

    /// Move a job into a final state, treating a repeated message as replay
    ///
    /// A job already in the requested state means the message was delivered
    /// before and the follow-up work must be done again. Any other final state
    /// contradicts the message.
    async fn complete_stage_job(
        &self,
        header: &MessageHeader,
        stage: WorkerScheduleInfo,
        job_id: i64,
        status: JobStatus,
    ) -> Result<JobSummary> {
        let jobs = self.repositories.stage_jobs(stage);
        let job = jobs
            .summary(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound { stage, id: job_id })?;

        match jobs.complete_job(job_id, Utc::now(), status).await {
            Ok(job) => {
                info!(
                    "{} job {} of run {} is {} (trace: {})",
                    stage, job.id, job.ort_run_id, status, header.trace_id
                );
                Ok(job)
            }
            Err(RepositoryError::JobAlreadyCompleted(_)) if job.status == status => {
                warn!(
                    "{} job {} of run {} is already {}, re-evaluating the run",
                    stage, job.id, job.ort_run_id, status
                );
                Ok(job)
            }
            Err(RepositoryError::JobAlreadyCompleted(_)) => {
                Err(OrchestratorError::InvalidState(format!(
                    "{} job {} is already {} and cannot become {}",
                    stage, job_id, job.status, status
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn after_job_completed(
        &self,
        header: &MessageHeader,
        stage: WorkerScheduleInfo,
        job: JobSummary,
        failure: Option<String>,
    ) -> Result<()> {
        if let Some(message) = failure {
            self.record_job_failure(job.ort_run_id, stage, message)
                .await?;
        }

        if stage == WorkerScheduleInfo::Notifier {
            self.strip_recipient_addresses(job.ort_run_id, job.id)
                .await?;
        }

        self.schedule_next_jobs(header, job.ort_run_id).await
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Schedule every stage that became eligible, or finish the run
    async fn schedule_next_jobs(&self, header: &MessageHeader, ort_run_id: i64) -> Result<()> {
        let run = self.get_run(ort_run_id).await?;

        if run.status.is_final() {
            warn!(
                "Run {} is already {}, not scheduling any jobs (trace: {})",
                run.id, run.status, header.trace_id
            );
            return Ok(());
        }

        let info = self.ort_run_info(&run).await?;

        for (stage, job) in &info.job_infos {
            if job.status == JobStatus::Created {
                warn!(
                    "{} job {} of run {} was never scheduled, publishing it again",
                    stage, job.id, run.id
                );
                self.dispatch_job(header, &run, *stage, job.id).await?;
            }
        }

        let next_jobs = info.next_jobs();

        for stage in &next_jobs {
            let job_id = self.create_job(&run, *stage).await?;
            self.dispatch_job(header, &run, *stage, job_id).await?;
        }

        if next_jobs.is_empty() && !info.has_active_jobs() {
            let status = info.final_status();
            self.repositories
                .runs
                .update(run.id, OrtRunUpdate::status(status))
                .await?;

            if status == OrtRunStatus::Failed {
                error!("Run {} finished with status {}", run.id, status);
            } else {
                info!("Run {} finished with status {}", run.id, status);
            }
        }

        Ok(())
    }

    /// Snapshot of the run built from the persisted jobs
    pub async fn ort_run_info(&self, run: &OrtRun) -> Result<OrtRunInfo> {
        let mut job_infos = HashMap::new();

        for stage in WorkerScheduleInfo::ALL {
            if let Some(job) = self
                .repositories
                .stage_jobs(stage)
                .summary_for_ort_run(run.id)
                .await?
            {
                job_infos.insert(
                    stage,
                    JobInfo {
                        id: job.id,
                        status: job.status,
                    },
                );
            }
        }

        let config_worker_failed = run.status == OrtRunStatus::Failed
            && run
                .issues
                .iter()
                .any(|issue| issue.source == Endpoint::Config.name());

        Ok(OrtRunInfo::new(
            run.id,
            config_worker_failed,
            run.effective_job_configs().configured_jobs(),
            job_infos,
        ))
    }

    async fn create_job(&self, run: &OrtRun, stage: WorkerScheduleInfo) -> Result<i64> {
        let configs = run.effective_job_configs();
        let missing = || {
            OrchestratorError::InvalidState(format!(
                "run {} has no {} configuration",
                run.id, stage
            ))
        };

        let id = match stage {
            WorkerScheduleInfo::Analyzer => {
                let configuration = configs.analyzer.clone();
                self.repositories
                    .analyzer_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
            WorkerScheduleInfo::Advisor => {
                let configuration = configs.advisor.clone().ok_or_else(missing)?;
                self.repositories
                    .advisor_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
            WorkerScheduleInfo::Scanner => {
                let configuration = configs.scanner.clone().ok_or_else(missing)?;
                self.repositories
                    .scanner_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
            WorkerScheduleInfo::Evaluator => {
                let configuration = configs.evaluator.clone().ok_or_else(missing)?;
                self.repositories
                    .evaluator_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
            WorkerScheduleInfo::Reporter => {
                let configuration = configs.reporter.clone().ok_or_else(missing)?;
                self.repositories
                    .reporter_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
            WorkerScheduleInfo::Notifier => {
                let configuration = configs.notifier.clone().ok_or_else(missing)?;
                self.repositories
                    .notifier_jobs
                    .create(run.id, configuration)
                    .await?
                    .id
            }
        };

        debug!("Created {} job {} for run {}", stage, id, run.id);
        Ok(id)
    }

    /// Publish the request of a job and mark it as scheduled
    async fn dispatch_job(
        &self,
        header: &MessageHeader,
        run: &OrtRun,
        stage: WorkerScheduleInfo,
        job_id: i64,
    ) -> Result<()> {
        self.publish(header, run, WorkerRequest::for_job(stage, job_id))
            .await?;

        let scheduled = self
            .repositories
            .stage_jobs(stage)
            .mark_job_scheduled(job_id)
            .await?;

        match scheduled {
            Some(_) => info!(
                "Scheduled {} job {} of run {} (trace: {})",
                stage, job_id, run.id, header.trace_id
            ),
            None => debug!(
                "{} job {} of run {} was picked up before it was marked as scheduled",
                stage, job_id, run.id
            ),
        }
        Ok(())
    }

    async fn publish(
        &self,
        header: &MessageHeader,
        run: &OrtRun,
        request: WorkerRequest,
    ) -> Result<()> {
        let endpoint = request.endpoint();
        let message = Message::new(outgoing_header(header, run), request);

        self.publisher.publish(endpoint, message).await?;
        debug!("Published request for run {} to '{}'", run.id, endpoint);
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn get_run(&self, id: i64) -> Result<OrtRun> {
        self.repositories
            .runs
            .get(id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(id))
    }

    async fn request_config(&self, header: &MessageHeader, run: &OrtRun) -> Result<()> {
        self.publish(
            header,
            run,
            WorkerRequest::Config(ConfigRequest { ort_run_id: run.id }),
        )
        .await
    }

    /// Whether an active run still waits for the config worker
    async fn awaits_config(&self, run: &OrtRun) -> Result<bool> {
        Ok(run.resolved_job_configs.is_none()
            && self
                .repositories
                .analyzer_jobs
                .get_for_ort_run(run.id)
                .await?
                .is_none())
    }

    async fn fail_config(&self, ort_run_id: i64, message: &str) -> Result<()> {
        let run = self.get_run(ort_run_id).await?;

        if run.status.is_final() {
            warn!(
                "Ignoring config failure for run {}, it is already {}",
                run.id, run.status
            );
            return Ok(());
        }

        let issue = Issue::error(Endpoint::Config.name(), message);
        self.repositories
            .runs
            .update(
                run.id,
                OrtRunUpdate::status(OrtRunStatus::Failed).with_issue(issue),
            )
            .await?;

        error!("Run {} failed: {}", run.id, message);
        Ok(())
    }

    /// Attach an issue for the failed job, once per stage
    async fn record_job_failure(
        &self,
        ort_run_id: i64,
        stage: WorkerScheduleInfo,
        message: String,
    ) -> Result<()> {
        let run = self.get_run(ort_run_id).await?;
        let source = stage.endpoint().name();

        if run.issues.iter().any(|issue| issue.source == source) {
            return Ok(());
        }

        self.repositories
            .runs
            .update(
                run.id,
                OrtRunUpdate::default().with_issue(Issue::error(source, message)),
            )
            .await?;
        Ok(())
    }

    /// Remove the mail recipients from the notifier job and the run
    async fn strip_recipient_addresses(&self, ort_run_id: i64, job_id: i64) -> Result<()> {
        if let Some(job) = self.repositories.notifier_jobs.get(job_id).await? {
            let mut configuration = job.configuration;
            if configuration.strip_recipient_addresses() {
                self.repositories
                    .notifier_jobs
                    .update_configuration(job_id, configuration)
                    .await?;
            }
        }

        let run = self.get_run(ort_run_id).await?;

        let mut job_configs = run.job_configs;
        let stripped = job_configs.strip_recipient_addresses();

        let mut resolved_job_configs = run.resolved_job_configs;
        let stripped_resolved = resolved_job_configs
            .as_mut()
            .is_some_and(JobConfigurations::strip_recipient_addresses);

        if stripped || stripped_resolved {
            let update = OrtRunUpdate {
                job_configs: stripped.then_some(job_configs),
                resolved_job_configs: resolved_job_configs.filter(|_| stripped_resolved),
                ..Default::default()
            };
            self.repositories.runs.update(ort_run_id, update).await?;
            debug!("Removed mail recipients from run {}", ort_run_id);
        }

        Ok(())
    }
}

/// Header for a request caused by `header`
///
/// Transport properties from the run's labels are combined with those of the
/// triggering message, the latter taking precedence.
fn outgoing_header(header: &MessageHeader, run: &OrtRun) -> MessageHeader {
    let mut transport_properties = run.transport_properties();
    transport_properties.extend(
        header
            .transport_properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let trace_id = if header.trace_id.is_empty() {
        run.trace_id.clone().unwrap_or_default()
    } else {
        header.trace_id.clone()
    };

    MessageHeader {
        token: header.token.clone(),
        trace_id,
        ort_run_id: run.id,
        transport_properties,
    }
}
