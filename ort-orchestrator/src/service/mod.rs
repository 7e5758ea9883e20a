//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The orchestrator reacts to worker messages, the receiver feeds it from the
//! transport and the lost jobs finder covers workers that never report back.

pub mod lost_jobs;
pub mod orchestrator;
pub mod receiver;

pub use lost_jobs::LostJobsFinder;
pub use orchestrator::Orchestrator;
pub use receiver::{MessageReceiver, RunLocks};
