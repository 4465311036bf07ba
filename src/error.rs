//! Error types for configuration and spec validation.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key} ({hint})")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Cannot use {path}: {reason}")]
    Path { path: PathBuf, reason: String },
}

/// Reasons an OpenAPI document is rejected before the mock server starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("{path} is not an OpenAPI 3 document: {reason}")]
    NotOpenApi { path: PathBuf, reason: String },

    #[error("{path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}
