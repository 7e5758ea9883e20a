//! ORT Server Orchestrator
//!
//! Drives ORT runs through their pipeline stages. The orchestrator receives
//! results and errors from the workers, records them through the repositories
//! and publishes requests for the stages that became ready.
//!
//! Layers:
//! - Repository: persistence of runs and jobs (Postgres or in memory)
//! - Transport: publishing requests to the worker endpoints
//! - Service: the orchestrator handlers, the message receiver and the lost job finder

pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;
pub mod transport;
