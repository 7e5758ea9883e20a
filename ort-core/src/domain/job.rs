//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::config::{
    AdvisorJobConfiguration, AnalyzerJobConfiguration, EvaluatorJobConfiguration,
    NotifierJobConfiguration, ReporterJobConfiguration, ScannerJobConfiguration,
};

/// One attempt to execute a pipeline stage for a run
///
/// The configuration type differs per stage, everything else is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<C> {
    pub id: i64,
    pub ort_run_id: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub configuration: C,
    pub status: JobStatus,
}

impl<C> Job<C> {
    /// Whether the job reached a state it can never leave again
    pub fn is_completed(&self) -> bool {
        self.status.is_final()
    }
}

pub type AnalyzerJob = Job<AnalyzerJobConfiguration>;
pub type AdvisorJob = Job<AdvisorJobConfiguration>;
pub type ScannerJob = Job<ScannerJobConfiguration>;
pub type EvaluatorJob = Job<EvaluatorJobConfiguration>;
pub type ReporterJob = Job<ReporterJobConfiguration>;
pub type NotifierJob = Job<NotifierJobConfiguration>;

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Finished,
    FinishedWithIssues,
    Failed,
}

impl JobStatus {
    /// Terminal states. A job in one of them is never touched by a worker again.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::FinishedWithIssues | JobStatus::Failed
        )
    }

    /// Terminal states that let dependent stages run.
    pub fn is_successful(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::FinishedWithIssues)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::FinishedWithIssues => "FINISHED_WITH_ISSUES",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(JobStatus::Created),
            "SCHEDULED" => Some(JobStatus::Scheduled),
            "RUNNING" => Some(JobStatus::Running),
            "FINISHED" => Some(JobStatus::Finished),
            "FINISHED_WITH_ISSUES" => Some(JobStatus::FinishedWithIssues),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
