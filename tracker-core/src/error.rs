//! Error types for the tracker

use thiserror::Error;

/// Tracker-wide error type
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    pub fn api(msg: impl Into<String>) -> Self {
        TrackerError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        TrackerError::Network(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        TrackerError::Schema(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        TrackerError::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TrackerError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        TrackerError::Internal(msg.into())
    }
}

/// Result type alias for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
