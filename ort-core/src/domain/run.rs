//! Run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::config::JobConfigurations;

/// Prefix of run labels that are forwarded to the transport layer
pub const TRANSPORT_LABEL_PREFIX: &str = "transport:";

/// One execution of the pipeline against a repository revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrtRun {
    pub id: i64,
    /// Sequential number of the run within its repository
    pub index: i64,
    pub repository_id: i64,
    pub revision: String,
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub job_configs: JobConfigurations,
    pub resolved_job_configs: Option<JobConfigurations>,
    pub resolved_job_config_context: Option<String>,
    pub status: OrtRunStatus,
    pub labels: HashMap<String, String>,
    pub issues: Vec<Issue>,
    pub trace_id: Option<String>,
}

impl OrtRun {
    /// The configuration the stages are scheduled from
    ///
    /// Falls back to the requested configuration until the config worker
    /// stored a resolved one.
    pub fn effective_job_configs(&self) -> &JobConfigurations {
        self.resolved_job_configs.as_ref().unwrap_or(&self.job_configs)
    }

    /// Labels meant for the transport, with the prefix removed
    pub fn transport_properties(&self) -> HashMap<String, String> {
        self.labels
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(TRANSPORT_LABEL_PREFIX)
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.to_string(), value.clone()))
            })
            .collect()
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrtRunStatus {
    Created,
    Active,
    Finished,
    FinishedWithIssues,
    Failed,
}

impl OrtRunStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrtRunStatus::Finished | OrtRunStatus::FinishedWithIssues | OrtRunStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrtRunStatus::Created => "CREATED",
            OrtRunStatus::Active => "ACTIVE",
            OrtRunStatus::Finished => "FINISHED",
            OrtRunStatus::FinishedWithIssues => "FINISHED_WITH_ISSUES",
            OrtRunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(OrtRunStatus::Created),
            "ACTIVE" => Some(OrtRunStatus::Active),
            "FINISHED" => Some(OrtRunStatus::Finished),
            "FINISHED_WITH_ISSUES" => Some(OrtRunStatus::FinishedWithIssues),
            "FAILED" => Some(OrtRunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrtRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

impl Issue {
    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

/// The source code repository a run analyzes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i64,
    pub organization_id: i64,
    pub product_id: i64,
    #[serde(rename = "type")]
    pub repository_type: RepositoryType,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryType {
    Git,
    GitRepo,
    Mercurial,
    Subversion,
}

impl RepositoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryType::Git => "GIT",
            RepositoryType::GitRepo => "GIT_REPO",
            RepositoryType::Mercurial => "MERCURIAL",
            RepositoryType::Subversion => "SUBVERSION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GIT" => Some(RepositoryType::Git),
            "GIT_REPO" => Some(RepositoryType::GitRepo),
            "MERCURIAL" => Some(RepositoryType::Mercurial),
            "SUBVERSION" => Some(RepositoryType::Subversion),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ReporterJobConfiguration;

    fn run_with_labels(labels: &[(&str, &str)]) -> OrtRun {
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
            status: OrtRunStatus::Created,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            issues: vec![],
            trace_id: None,
        }
    }

    #[test]
    fn test_transport_properties_strip_prefix() {
        let run = run_with_labels(&[
            ("transport:kubernetes.cpu", "2"),
            ("transport:", "ignored"),
            ("team", "compliance"),
        ]);

        let properties = run.transport_properties();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.get("kubernetes.cpu"), Some(&"2".to_string()));
    }

    #[test]
    fn test_effective_job_configs_prefers_resolved() {
        let mut run = run_with_labels(&[]);
        assert!(run.effective_job_configs().reporter.is_none());

        run.resolved_job_configs = Some(JobConfigurations {
            reporter: Some(ReporterJobConfiguration::default()),
            ..Default::default()
        });
        assert!(run.effective_job_configs().reporter.is_some());
    }

    #[test]
    fn test_run_final_states() {
        assert!(!OrtRunStatus::Created.is_final());
        assert!(!OrtRunStatus::Active.is_final());
        assert!(OrtRunStatus::Finished.is_final());
        assert!(OrtRunStatus::FinishedWithIssues.is_final());
        assert!(OrtRunStatus::Failed.is_final());
    }
}
