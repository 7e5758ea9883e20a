//! Pipeline stages and message endpoints

use serde::{Deserialize, Serialize};

/// A message endpoint of the ORT server
///
/// Every worker listens on its own endpoint, the orchestrator on `orchestrator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Orchestrator,
    Config,
    Analyzer,
    Advisor,
    Scanner,
    Evaluator,
    Reporter,
    Notifier,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::Orchestrator,
        Endpoint::Config,
        Endpoint::Analyzer,
        Endpoint::Advisor,
        Endpoint::Scanner,
        Endpoint::Evaluator,
        Endpoint::Reporter,
        Endpoint::Notifier,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Orchestrator => "orchestrator",
            Endpoint::Config => "config",
            Endpoint::Analyzer => "analyzer",
            Endpoint::Advisor => "advisor",
            Endpoint::Scanner => "scanner",
            Endpoint::Evaluator => "evaluator",
            Endpoint::Reporter => "reporter",
            Endpoint::Notifier => "notifier",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.name() == name)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The schedulable stages of a run, in pipeline order
///
/// Each stage knows which stages must have finished successfully before it can
/// run at all (`depends_on`), which stages must no longer be pending before it
/// is started (`runs_after`), and whether it still runs once something in the
/// run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerScheduleInfo {
    Analyzer,
    Advisor,
    Scanner,
    Evaluator,
    Reporter,
    Notifier,
}

impl WorkerScheduleInfo {
    pub const ALL: [WorkerScheduleInfo; 6] = [
        WorkerScheduleInfo::Analyzer,
        WorkerScheduleInfo::Advisor,
        WorkerScheduleInfo::Scanner,
        WorkerScheduleInfo::Evaluator,
        WorkerScheduleInfo::Reporter,
        WorkerScheduleInfo::Notifier,
    ];

    pub fn endpoint(self) -> Endpoint {
        match self {
            WorkerScheduleInfo::Analyzer => Endpoint::Analyzer,
            WorkerScheduleInfo::Advisor => Endpoint::Advisor,
            WorkerScheduleInfo::Scanner => Endpoint::Scanner,
            WorkerScheduleInfo::Evaluator => Endpoint::Evaluator,
            WorkerScheduleInfo::Reporter => Endpoint::Reporter,
            WorkerScheduleInfo::Notifier => Endpoint::Notifier,
        }
    }

    /// The stage listening on `endpoint`. The orchestrator and config endpoints
    /// have no stage.
    pub fn for_endpoint(endpoint: Endpoint) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.endpoint() == endpoint)
    }

    /// Stages whose successful completion is a precondition
    pub fn depends_on(self) -> &'static [WorkerScheduleInfo] {
        match self {
            WorkerScheduleInfo::Analyzer => &[],
            WorkerScheduleInfo::Advisor
            | WorkerScheduleInfo::Scanner
            | WorkerScheduleInfo::Evaluator => &[WorkerScheduleInfo::Analyzer],
            WorkerScheduleInfo::Reporter | WorkerScheduleInfo::Notifier => &[],
        }
    }

    /// Stages that must not be pending anymore when this one starts
    pub fn runs_after(self) -> &'static [WorkerScheduleInfo] {
        match self {
            WorkerScheduleInfo::Analyzer => &[],
            WorkerScheduleInfo::Advisor | WorkerScheduleInfo::Scanner => {
                &[WorkerScheduleInfo::Analyzer]
            }
            WorkerScheduleInfo::Evaluator => {
                &[WorkerScheduleInfo::Advisor, WorkerScheduleInfo::Scanner]
            }
            WorkerScheduleInfo::Reporter => &[
                WorkerScheduleInfo::Analyzer,
                WorkerScheduleInfo::Advisor,
                WorkerScheduleInfo::Scanner,
                WorkerScheduleInfo::Evaluator,
            ],
            WorkerScheduleInfo::Notifier => &[WorkerScheduleInfo::Reporter],
        }
    }

    /// `runs_after`, followed recursively
    pub fn runs_after_transitively(self) -> Vec<WorkerScheduleInfo> {
        let mut result = Vec::new();
        let mut queue = self.runs_after().to_vec();

        while let Some(stage) = queue.pop() {
            if !result.contains(&stage) {
                result.push(stage);
                queue.extend_from_slice(stage.runs_after());
            }
        }

        result
    }

    /// Whether the stage is still scheduled after a failure in the run
    pub fn runs_after_failure(self) -> bool {
        matches!(
            self,
            WorkerScheduleInfo::Reporter | WorkerScheduleInfo::Notifier
        )
    }
}

impl std::fmt::Display for WorkerScheduleInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.endpoint().name())
    }
}
