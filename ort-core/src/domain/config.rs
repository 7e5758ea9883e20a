//! Job configuration types
//!
//! A run carries one [`JobConfigurations`] as requested by the user and, once
//! the config worker resolved it, a second one with the effective values.
//! An absent stage configuration means the stage was not requested.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::domain::schedule::WorkerScheduleInfo;

/// Per-stage configuration of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigurations {
    #[serde(default)]
    pub analyzer: AnalyzerJobConfiguration,
    pub advisor: Option<AdvisorJobConfiguration>,
    pub scanner: Option<ScannerJobConfiguration>,
    pub evaluator: Option<EvaluatorJobConfiguration>,
    pub reporter: Option<ReporterJobConfiguration>,
    pub notifier: Option<NotifierJobConfiguration>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub ruleset: Option<String>,
}

impl JobConfigurations {
    /// The stages requested by this configuration, in pipeline order
    ///
    /// The analyzer is always part of a run.
    pub fn configured_jobs(&self) -> BTreeSet<WorkerScheduleInfo> {
        let mut jobs = BTreeSet::from([WorkerScheduleInfo::Analyzer]);

        if self.advisor.is_some() {
            jobs.insert(WorkerScheduleInfo::Advisor);
        }
        if self.scanner.is_some() {
            jobs.insert(WorkerScheduleInfo::Scanner);
        }
        if self.evaluator.is_some() {
            jobs.insert(WorkerScheduleInfo::Evaluator);
        }
        if self.reporter.is_some() {
            jobs.insert(WorkerScheduleInfo::Reporter);
        }
        if self.notifier.is_some() {
            jobs.insert(WorkerScheduleInfo::Notifier);
        }

        jobs
    }

    /// Removes the mail recipients of the notifier, if any.
    ///
    /// Returns whether something was removed.
    pub fn strip_recipient_addresses(&mut self) -> bool {
        self.notifier
            .as_mut()
            .is_some_and(NotifierJobConfiguration::strip_recipient_addresses)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerJobConfiguration {
    #[serde(default)]
    pub allow_dynamic_versions: bool,
    pub enabled_package_managers: Option<Vec<String>>,
    pub disabled_package_managers: Option<Vec<String>>,
    #[serde(default)]
    pub package_manager_options: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub skip_excluded: bool,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorJobConfiguration {
    #[serde(default)]
    pub advisors: Vec<String>,
    #[serde(default)]
    pub skip_excluded: bool,
    #[serde(default)]
    pub config: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerJobConfiguration {
    #[serde(default)]
    pub scanners: Vec<String>,
    pub project_scanners: Option<Vec<String>>,
    #[serde(default)]
    pub create_missing_archives: bool,
    #[serde(default)]
    pub skip_concluded: bool,
    #[serde(default)]
    pub skip_excluded: bool,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorJobConfiguration {
    pub copyright_garbage_file: Option<String>,
    pub license_classifications_file: Option<String>,
    #[serde(default)]
    pub package_configuration_providers: Vec<String>,
    pub rule_set: Option<String>,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterJobConfiguration {
    #[serde(default)]
    pub formats: Vec<String>,
    pub copyright_garbage_file: Option<String>,
    pub license_classifications_file: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierJobConfiguration {
    pub notifier_rules: Option<String>,
    pub resolutions_file: Option<String>,
    pub mail: Option<MailNotificationConfiguration>,
    pub jira: Option<JiraNotificationConfiguration>,
    #[serde(default)]
    pub keep_alive_worker: bool,
}

impl NotifierJobConfiguration {
    /// Removes the mail recipients. Returns whether there were any.
    pub fn strip_recipient_addresses(&mut self) -> bool {
        match self.mail.as_mut() {
            Some(mail) if !mail.recipient_addresses.is_empty() => {
                mail.recipient_addresses.clear();
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailNotificationConfiguration {
    #[serde(default)]
    pub recipient_addresses: Vec<String>,
    pub mail_server: Option<MailServerConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailServerConfiguration {
    pub host_name: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    pub from_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraNotificationConfiguration {
    pub server_url: Option<String>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier_with_recipients(recipients: &[&str]) -> NotifierJobConfiguration {
        NotifierJobConfiguration {
            mail: Some(MailNotificationConfiguration {
                recipient_addresses: recipients.iter().map(|r| r.to_string()).collect(),
                mail_server: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_analyzer_is_always_configured() {
        let configs = JobConfigurations::default();
        assert_eq!(
            configs.configured_jobs(),
            BTreeSet::from([WorkerScheduleInfo::Analyzer])
        );
    }

    #[test]
    fn test_configured_jobs_follow_present_configs() {
        let configs = JobConfigurations {
            scanner: Some(ScannerJobConfiguration::default()),
            reporter: Some(ReporterJobConfiguration::default()),
            ..Default::default()
        };

        assert_eq!(
            configs.configured_jobs(),
            BTreeSet::from([
                WorkerScheduleInfo::Analyzer,
                WorkerScheduleInfo::Scanner,
                WorkerScheduleInfo::Reporter,
            ])
        );
    }

    #[test]
    fn test_strip_recipient_addresses() {
        let mut configs = JobConfigurations {
            notifier: Some(notifier_with_recipients(&["a@example.org", "b@example.org"])),
            ..Default::default()
        };

        assert!(configs.strip_recipient_addresses());
        let mail = configs.notifier.as_ref().and_then(|n| n.mail.as_ref()).unwrap();
        assert!(mail.recipient_addresses.is_empty());

        // Nothing left to strip.
        assert!(!configs.strip_recipient_addresses());
    }

    #[test]
    fn test_strip_without_notifier() {
        let mut configs = JobConfigurations::default();
        assert!(!configs.strip_recipient_addresses());
    }

    #[test]
    fn test_deserialize_minimal_configuration() {
        let configs: JobConfigurations =
            serde_json::from_str(r#"{"reporter": {"formats": ["WebApp"]}}"#).unwrap();

        assert_eq!(configs.analyzer, AnalyzerJobConfiguration::default());
        assert_eq!(
            configs.reporter.map(|r| r.formats),
            Some(vec!["WebApp".to_string()])
        );
        assert!(configs.notifier.is_none());
    }
}
