//! ORT Server Orchestrator
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: Postgres or in-memory storage of runs and jobs
//! - Transport: In-memory broker with one channel per endpoint
//! - Services: Message receiver, orchestrator handlers and lost jobs finder
//!
//! The receiver consumes the orchestrator endpoint until the process is
//! interrupted. With the in-memory transport, orchestrator messages are read
//! from stdin as one JSON document per line, and the requests for the workers
//! are written to the log.

use anyhow::{Context, Result};
use ort_core::domain::schedule::Endpoint;
use ort_orchestrator::config::{Config, Storage};
use ort_orchestrator::db;
use ort_orchestrator::repository::{InMemoryRepositoryRepository, Repositories};
use ort_orchestrator::service::{LostJobsFinder, MessageReceiver, Orchestrator, RunLocks};
use ort_orchestrator::transport::InMemoryBroker;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ort_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ORT Orchestrator");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!("Loaded configuration: storage={:?}", config.storage);

    let repositories = create_repositories(&config).await?;

    let broker = Arc::new(InMemoryBroker::new());
    let messages = broker
        .subscribe(Endpoint::Orchestrator)
        .await
        .context("Orchestrator endpoint already has a subscriber")?;

    for endpoint in Endpoint::ALL {
        if endpoint == Endpoint::Orchestrator {
            continue;
        }
        if let Some(requests) = broker.subscribe(endpoint).await {
            tokio::spawn(log_worker_requests(endpoint, requests));
        }
    }
    let stdin_handle = tokio::spawn(forward_stdin(broker.clone()));

    let orchestrator = Arc::new(Orchestrator::new(repositories, broker.clone()));
    let run_locks = RunLocks::new();

    let finder = LostJobsFinder::new(
        orchestrator.clone(),
        run_locks.clone(),
        config.lost_jobs_check_interval,
        config.job_timeout,
    );
    let finder_handle = tokio::spawn(async move { finder.run().await });

    let receiver = MessageReceiver::new(
        orchestrator,
        run_locks,
        config.max_concurrent_messages,
        config.max_delivery_attempts,
    );

    info!("Orchestrator initialized successfully");

    tokio::select! {
        _ = receiver.run(messages) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    finder_handle.abort();
    stdin_handle.abort();
    info!("ORT Orchestrator stopped");

    Ok(())
}

async fn create_repositories(config: &Config) -> Result<Repositories> {
    match config.storage {
        Storage::Postgres => {
            info!("Connecting to database...");

            let pool = db::create_pool(&config.database_url, config.database_max_connections)
                .await
                .context("Failed to create database pool")?;

            info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Ok(Repositories::postgres(pool))
        }
        Storage::Memory => {
            info!("Keeping runs and jobs in memory");
            Ok(Repositories::in_memory(Arc::new(
                InMemoryRepositoryRepository::new(),
            )))
        }
    }
}

/// Feed lines from stdin to the orchestrator endpoint
async fn forward_stdin(broker: Arc<InMemoryBroker>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                if let Err(e) = broker.send_raw(Endpoint::Orchestrator.name(), line) {
                    error!("Failed to enqueue message from stdin: {}", e);
                }
            }
            Ok(None) => {
                info!("stdin closed, no more messages will be read");
                break;
            }
            Err(e) => {
                error!("Failed to read from stdin: {}", e);
                break;
            }
        }
    }
}

/// Drain the requests for a worker endpoint into the log
async fn log_worker_requests(
    endpoint: Endpoint,
    mut requests: tokio::sync::mpsc::UnboundedReceiver<String>,
) {
    while let Some(body) = requests.recv().await {
        info!("Request for '{}': {}", endpoint, body);
    }
}
