//! Requests sent by the orchestrator to the workers

use serde::{Deserialize, Serialize};

use crate::domain::schedule::{Endpoint, WorkerScheduleInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub ort_run_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerRequest {
    pub analyzer_job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorRequest {
    pub advisor_job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerRequest {
    pub scanner_job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorRequest {
    pub evaluator_job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterRequest {
    pub reporter_job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierRequest {
    pub notifier_job_id: i64,
}

/// Work for one of the worker endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    Config(ConfigRequest),
    Analyzer(AnalyzerRequest),
    Advisor(AdvisorRequest),
    Scanner(ScannerRequest),
    Evaluator(EvaluatorRequest),
    Reporter(ReporterRequest),
    Notifier(NotifierRequest),
}

impl WorkerRequest {
    /// The request that starts `job_id` of the given stage
    pub fn for_job(stage: WorkerScheduleInfo, job_id: i64) -> Self {
        match stage {
            WorkerScheduleInfo::Analyzer => WorkerRequest::Analyzer(AnalyzerRequest {
                analyzer_job_id: job_id,
            }),
            WorkerScheduleInfo::Advisor => WorkerRequest::Advisor(AdvisorRequest {
                advisor_job_id: job_id,
            }),
            WorkerScheduleInfo::Scanner => WorkerRequest::Scanner(ScannerRequest {
                scanner_job_id: job_id,
            }),
            WorkerScheduleInfo::Evaluator => WorkerRequest::Evaluator(EvaluatorRequest {
                evaluator_job_id: job_id,
            }),
            WorkerScheduleInfo::Reporter => WorkerRequest::Reporter(ReporterRequest {
                reporter_job_id: job_id,
            }),
            WorkerScheduleInfo::Notifier => WorkerRequest::Notifier(NotifierRequest {
                notifier_job_id: job_id,
            }),
        }
    }

    /// The endpoint the request must be published to
    pub fn endpoint(&self) -> Endpoint {
        match self {
            WorkerRequest::Config(_) => Endpoint::Config,
            WorkerRequest::Analyzer(_) => Endpoint::Analyzer,
            WorkerRequest::Advisor(_) => Endpoint::Advisor,
            WorkerRequest::Scanner(_) => Endpoint::Scanner,
            WorkerRequest::Evaluator(_) => Endpoint::Evaluator,
            WorkerRequest::Reporter(_) => Endpoint::Reporter,
            WorkerRequest::Notifier(_) => Endpoint::Notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_matches_stage_endpoint() {
        for stage in WorkerScheduleInfo::ALL {
            assert_eq!(WorkerRequest::for_job(stage, 1).endpoint(), stage.endpoint());
        }
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(WorkerRequest::for_job(WorkerScheduleInfo::Scanner, 42))
            .unwrap();
        assert_eq!(json["type"], "Scanner");
        assert_eq!(json["scannerJobId"], 42);
    }
}
