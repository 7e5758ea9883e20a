//! Messages received by the orchestrator

use serde::{Deserialize, Serialize};

/// A new run was created and waits to be started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrtRun {
    pub ort_run_id: i64,
}

/// The config worker resolved the job configurations of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigWorkerResult {
    pub ort_run_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigWorkerError {
    pub ort_run_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerWorkerResult {
    pub job_id: i64,
    #[serde(default)]
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerWorkerError {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorWorkerResult {
    pub job_id: i64,
    #[serde(default)]
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorWorkerError {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerWorkerResult {
    pub job_id: i64,
    #[serde(default)]
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerWorkerError {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorWorkerResult {
    pub job_id: i64,
    #[serde(default)]
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorWorkerError {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterWorkerResult {
    pub job_id: i64,
    #[serde(default)]
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterWorkerError {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierWorkerResult {
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierWorkerError {
    pub job_id: i64,
}

/// A worker failed without knowing the job it was working on
///
/// Sent by infrastructure, e.g. when a worker process crashed or timed out.
/// The run is identified by the message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerError {
    pub endpoint_name: String,
}

/// Everything the orchestrator endpoint accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestratorMessage {
    CreateOrtRun(CreateOrtRun),
    ConfigWorkerResult(ConfigWorkerResult),
    ConfigWorkerError(ConfigWorkerError),
    AnalyzerWorkerResult(AnalyzerWorkerResult),
    AnalyzerWorkerError(AnalyzerWorkerError),
    AdvisorWorkerResult(AdvisorWorkerResult),
    AdvisorWorkerError(AdvisorWorkerError),
    ScannerWorkerResult(ScannerWorkerResult),
    ScannerWorkerError(ScannerWorkerError),
    EvaluatorWorkerResult(EvaluatorWorkerResult),
    EvaluatorWorkerError(EvaluatorWorkerError),
    ReporterWorkerResult(ReporterWorkerResult),
    ReporterWorkerError(ReporterWorkerError),
    NotifierWorkerResult(NotifierWorkerResult),
    NotifierWorkerError(NotifierWorkerError),
    WorkerError(WorkerError),
}

impl OrchestratorMessage {
    /// Name of the variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorMessage::CreateOrtRun(_) => "CreateOrtRun",
            OrchestratorMessage::ConfigWorkerResult(_) => "ConfigWorkerResult",
            OrchestratorMessage::ConfigWorkerError(_) => "ConfigWorkerError",
            OrchestratorMessage::AnalyzerWorkerResult(_) => "AnalyzerWorkerResult",
            OrchestratorMessage::AnalyzerWorkerError(_) => "AnalyzerWorkerError",
            OrchestratorMessage::AdvisorWorkerResult(_) => "AdvisorWorkerResult",
            OrchestratorMessage::AdvisorWorkerError(_) => "AdvisorWorkerError",
            OrchestratorMessage::ScannerWorkerResult(_) => "ScannerWorkerResult",
            OrchestratorMessage::ScannerWorkerError(_) => "ScannerWorkerError",
            OrchestratorMessage::EvaluatorWorkerResult(_) => "EvaluatorWorkerResult",
            OrchestratorMessage::EvaluatorWorkerError(_) => "EvaluatorWorkerError",
            OrchestratorMessage::ReporterWorkerResult(_) => "ReporterWorkerResult",
            OrchestratorMessage::ReporterWorkerError(_) => "ReporterWorkerError",
            OrchestratorMessage::NotifierWorkerResult(_) => "NotifierWorkerResult",
            OrchestratorMessage::NotifierWorkerError(_) => "NotifierWorkerError",
            OrchestratorMessage::WorkerError(_) => "WorkerError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::message::{Message, MessageHeader};

    #[test]
    fn test_message_is_tagged_by_type() {
        let message = OrchestratorMessage::ScannerWorkerResult(ScannerWorkerResult {
            job_id: 7,
            has_issues: false,
        });

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "ScannerWorkerResult");
        assert_eq!(json["jobId"], 7);
    }

    #[test]
    fn test_has_issues_defaults_to_false() {
        let message: OrchestratorMessage =
            serde_json::from_str(r#"{"type": "AnalyzerWorkerResult", "jobId": 3}"#).unwrap();

        assert_eq!(
            message,
            OrchestratorMessage::AnalyzerWorkerResult(AnalyzerWorkerResult {
                job_id: 3,
                has_issues: false,
            })
        );
    }

    #[test]
    fn test_envelope_from_worker() {
        let json = r#"{
            "header": {
                "token": "",
                "traceId": "trace-1",
                "ortRunId": 12,
                "transportProperties": {"kubernetes.cpu": "2"}
            },
            "payload": {"type": "WorkerError", "endpointName": "scanner"}
        }"#;

        let message: Message<OrchestratorMessage> = serde_json::from_str(json).unwrap();
        assert_eq!(message.header.ort_run_id, 12);
        assert_eq!(message.header.trace_id, "trace-1");
        assert_eq!(message.payload.kind(), "WorkerError");
    }

    #[test]
    fn test_header_without_properties() {
        let header: MessageHeader =
            serde_json::from_str(r#"{"token": "t", "traceId": "x", "ortRunId": 1}"#).unwrap();
        assert!(header.transport_properties.is_empty());
    }
}
