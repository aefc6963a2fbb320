//! Runtime error types.

use thiserror::Error;

/// Errors from browser runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {url}: {message}")]
    Navigate { url: String, message: String },

    #[error("unknown handle: {0}")]
    UnknownHandle(u64),

    #[error("unit already closed: {0}")]
    Closed(u64),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
