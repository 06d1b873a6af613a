//! Scheduler error types.

use thiserror::Error;

/// Errors a placement strategy can return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("no eligible engine for container {container} ({considered} engines considered)")]
    NoEligibleEngine { container: String, considered: usize },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
