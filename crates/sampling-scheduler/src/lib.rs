//! Frame Sampling Scheduler
//!
//! Drives periodic frame acquisition and submission with a strict
//! one-in-flight policy, and provides the reconnect backoff policy used by
//! the session's owner.

mod backoff;
mod ledger;
mod scheduler;

pub use backoff::BackoffPolicy;
pub use ledger::InFlightLedger;
pub use scheduler::{SamplingConfig, SamplingScheduler, SchedulerStats, TickOutcome};

use thiserror::Error;

/// Scheduler configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("Sampling interval must be positive")]
    ZeroInterval,

    #[error("Backoff policy invalid: {0}")]
    InvalidBackoff(String),
}
