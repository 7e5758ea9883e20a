//! Message receiver
//!
//! Consumes the orchestrator endpoint. Messages are handled concurrently up to
//! a limit, but never two messages of the same run at once. Failures that may
//! go away are retried with exponential backoff, everything else is logged
//! and dropped.

use ort_core::dto::message::Message;
use ort_core::dto::orchestrator::OrchestratorMessage;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::service::Orchestrator;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// One async lock per run
///
/// Shared by everything that changes runs, so the receiver and the lost jobs
/// finder never work on the same run at the same time.
#[derive(Clone, Default)]
pub struct RunLocks {
    locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` while holding the lock of the run
    pub async fn with_lock<F, T>(&self, ort_run_id: i64, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .locks
            .lock()
            .await
            .entry(ort_run_id)
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            task.await
        };
        drop(lock);

        // Nobody else can clone the entry while the map is locked
        let mut locks = self.locks.lock().await;
        if locks
            .get(&ort_run_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&ort_run_id);
        }

        result
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Feeds messages of the orchestrator endpoint to the [`Orchestrator`]
#[derive(Clone)]
pub struct MessageReceiver {
    orchestrator: Arc<Orchestrator>,
    run_locks: RunLocks,
    semaphore: Arc<Semaphore>,
    max_delivery_attempts: u32,
    retry_delay: Duration,
}

impl MessageReceiver {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        run_locks: RunLocks,
        max_concurrent_messages: usize,
        max_delivery_attempts: u32,
    ) -> Self {
        Self {
            orchestrator,
            run_locks,
            semaphore: Arc::new(Semaphore::new(max_concurrent_messages)),
            max_delivery_attempts,
            retry_delay: INITIAL_RETRY_DELAY,
        }
    }

    /// Initial delay before a failed message is handled again
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Handle messages until the channel is closed
    ///
    /// Returns once all messages received so far are handled.
    pub async fn run(&self, mut messages: UnboundedReceiver<String>) {
        info!(
            "Receiving orchestrator messages (max concurrent: {}, max attempts: {})",
            self.semaphore.available_permits(),
            self.max_delivery_attempts
        );

        let mut tasks = JoinSet::new();

        while let Some(body) = messages.recv().await {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    warn!("Message task panicked: {}", e);
                }
            }

            let message = match serde_json::from_str::<Message<OrchestratorMessage>>(&body) {
                Ok(message) => message,
                Err(e) => {
                    error!("Discarding malformed message: {}", e);
                    continue;
                }
            };

            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };

            let receiver = self.clone();
            tasks.spawn(async move {
                // Errors are logged by deliver
                let _ = receiver.deliver(message).await;
                drop(permit);
            });
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                warn!("Message task panicked: {}", e);
            }
        }

        info!("Orchestrator endpoint closed, receiver stopped");
    }

    /// Handle one message under its run's lock, retrying retryable failures
    pub async fn deliver(&self, message: Message<OrchestratorMessage>) -> Result<()> {
        let ort_run_id = message.header.ort_run_id;
        let kind = message.payload.kind();
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        debug!("Handling {} for run {}", kind, ort_run_id);

        loop {
            attempt += 1;

            let result = self
                .run_locks
                .with_lock(ort_run_id, self.orchestrator.handle(message.clone()))
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_delivery_attempts => {
                    warn!(
                        "Handling {} for run {} failed (attempt {}/{}): {}",
                        kind, ort_run_id, attempt, self.max_delivery_attempts, e
                    );
                    warn!("Retrying in {} ms...", delay.as_millis());

                    tokio::time::sleep(delay).await;

                    // Exponential backoff with cap
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => {
                    error!(
                        "Dropping {} for run {} after {} attempt(s): {}",
                        kind, ort_run_id, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }
}
