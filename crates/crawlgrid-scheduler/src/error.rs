//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
