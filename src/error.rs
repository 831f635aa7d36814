//! Custom error types for health-ingest

use thiserror::Error;

/// Main error type for health-ingest operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input file could not be read while streaming chunks
    #[error("Transport error: {0}")]
    Transport(String),

    /// A pipeline task died or a channel closed unexpectedly
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Not initialized: run 'health-ingest init' first")]
    NotInitialized,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Pipeline(err.to_string())
    }
}

/// Result type alias for health-ingest
pub type Result<T> = std::result::Result<T, Error>;
