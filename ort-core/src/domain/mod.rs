//! Core domain types
//!
//! This module contains the domain structures used across ORT server components.
//! The orchestrator persists them through its repositories, the workers receive
//! the identifiers they need through the transport.

pub mod config;
pub mod job;
pub mod run;
pub mod schedule;
