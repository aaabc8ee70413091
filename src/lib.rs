//! Cron-driven trigger for a batch-job orchestrator.
//! Each run submits at most one job, for the next pending date of an
//! inclusive range, and records progress in a local state file.

pub mod client;
pub mod date;
pub mod error;
pub mod payload;
pub mod runner;
pub mod state;

pub use client::{Client, DEFAULT_ENDPOINT, Outcome, TransportConfig};
pub use date::{BatchDate, DateRange};
pub use error::TriggerError;
pub use payload::JobSubmission;
pub use runner::{HaltPolicy, RunArgs, RunConfig, RunReport, run};
pub use state::{Advance, CursorPhase, CursorState, StateStore};
