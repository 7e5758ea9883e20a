//! Orchestrator error types

use ort_core::domain::schedule::WorkerScheduleInfo;
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised while handling a message
///
/// Domain outcomes such as failed workers are not errors; they end up as job
/// and run status changes. What remains are infrastructure failures, which
/// are worth another delivery attempt, and broken invariants, which are not.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Run {0} not found")]
    RunNotFound(i64),

    #[error("{stage} job {id} not found")]
    JobNotFound { stage: WorkerScheduleInfo, id: i64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

impl OrchestratorError {
    /// Whether handling the same message again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Repository(err) => err.is_retryable(),
            OrchestratorError::Transport(err) => err.is_retryable(),
            OrchestratorError::RunNotFound(_)
            | OrchestratorError::JobNotFound { .. }
            | OrchestratorError::InvalidState(_)
            | OrchestratorError::UnknownEndpoint(_) => false,
        }
    }
}
