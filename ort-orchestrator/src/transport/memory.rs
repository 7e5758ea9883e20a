//! In-memory transport
//!
//! Every endpoint gets an unbounded channel of JSON-encoded messages. Messages
//! go through serialization like on a real broker, so wire format problems
//! surface here as well.

use async_trait::async_trait;
use ort_core::domain::schedule::Endpoint;
use ort_core::dto::message::Message;
use ort_core::dto::worker::WorkerRequest;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{MessagePublisher, TransportError};

/// Per-endpoint channels inside one process
pub struct InMemoryBroker {
    senders: HashMap<Endpoint, UnboundedSender<String>>,
    receivers: Mutex<HashMap<Endpoint, UnboundedReceiver<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for endpoint in Endpoint::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(endpoint, tx);
            receivers.insert(endpoint, rx);
        }

        Self {
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    /// Takes the receiving side of an endpoint
    ///
    /// Each endpoint has a single consumer; later calls return `None`.
    pub async fn subscribe(&self, endpoint: Endpoint) -> Option<UnboundedReceiver<String>> {
        self.receivers.lock().await.remove(&endpoint)
    }

    /// Serializes and enqueues a message
    pub fn send<T: Serialize>(
        &self,
        endpoint: Endpoint,
        message: &Message<T>,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_string(message)?;
        self.enqueue(endpoint, body)
    }

    /// Enqueues an already encoded message for the endpoint with the given name
    pub fn send_raw(&self, endpoint_name: &str, body: String) -> Result<(), TransportError> {
        let endpoint = Endpoint::from_name(endpoint_name)
            .ok_or_else(|| TransportError::UnknownEndpoint(endpoint_name.to_string()))?;
        self.enqueue(endpoint, body)
    }

    fn enqueue(&self, endpoint: Endpoint, body: String) -> Result<(), TransportError> {
        let sender = self
            .senders
            .get(&endpoint)
            .ok_or(TransportError::ChannelClosed(endpoint))?;

        sender
            .send(body)
            .map_err(|_| TransportError::ChannelClosed(endpoint))?;

        tracing::debug!("Enqueued message for endpoint '{}'", endpoint);
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(
        &self,
        endpoint: Endpoint,
        message: Message<WorkerRequest>,
    ) -> Result<(), TransportError> {
        self.send(endpoint, &message)
    }
}
