//! Transport Module
//!
//! Delivery of messages between the orchestrator and the workers. The
//! orchestrator publishes through [`MessagePublisher`] and never sees which
//! transport carries the messages.

pub mod memory;

use async_trait::async_trait;
use ort_core::domain::schedule::Endpoint;
use ort_core::dto::message::Message;
use ort_core::dto::worker::WorkerRequest;
use thiserror::Error;

pub use memory::InMemoryBroker;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel for endpoint '{0}' is closed")]
    ChannelClosed(Endpoint),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

impl TransportError {
    /// Whether publishing the same message again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::ChannelClosed(_))
    }
}

/// Sends requests to worker endpoints
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        endpoint: Endpoint,
        message: Message<WorkerRequest>,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_closed_channels_are_retryable() {
        assert!(TransportError::ChannelClosed(Endpoint::Config).is_retryable());
        assert!(!TransportError::UnknownEndpoint("kafka".to_string()).is_retryable());
    }
}
