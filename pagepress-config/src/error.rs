//! Configuration error types

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Domain-specific configuration error
    #[error("configuration error in {domain}: {message}")]
    Domain { domain: String, message: String },
}
