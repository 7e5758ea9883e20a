//! ORT Server Core
//!
//! Core types and scheduling logic shared by the ORT server components.
//!
//! This crate contains:
//! - Domain types: runs, jobs, job configurations and the pipeline stages
//! - DTOs: messages exchanged between the orchestrator and the workers
//! - Run info: the pure decision of which stages are ready to be scheduled

pub mod domain;
pub mod dto;
pub mod run_info;
