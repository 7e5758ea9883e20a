//! Data Transfer Objects for inter-service communication
//!
//! This module contains the messages exchanged between the orchestrator and
//! the workers. They carry identifiers only; the receiving side loads the
//! records it needs from the database.

pub mod message;
pub mod orchestrator;
pub mod worker;
