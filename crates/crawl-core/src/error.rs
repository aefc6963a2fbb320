//! Core error types.

use thiserror::Error;

/// Errors from core parsing and loading operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("jobs file parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
