//! Pool error types.

use thiserror::Error;

/// Errors from pool operations.
///
/// Exhaustion is deliberately not here: a full pool answers `acquire`
/// with `None`. These errors mark caller bugs and lifecycle edges.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("resource not checked out: {0}")]
    NotAcquired(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("pool is shutting down")]
    ShuttingDown,
}

pub type PoolResult<T> = Result<T, PoolError>;
