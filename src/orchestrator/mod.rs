//! Job lifecycle orchestration.
//!
//! This module owns the job state machine (submit/stop/reset), the two
//! polling loops that mirror engine state while a job runs, and post-run
//! processing such as exports and auto-save. UI/CLI layers talk to it
//! through [`JobOrchestrator`] and never touch the engine directly for
//! lifecycle operations.

mod controller;
mod polling;
mod post_process;

pub use controller::{JobOrchestrator, OrchestratorError};
pub use post_process::{process_job_completion, ProcessedJob};
