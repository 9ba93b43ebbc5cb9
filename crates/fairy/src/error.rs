//! Queue-specific error types

use thiserror::Error;

/// Errors surfaced by queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Malformed task: {0}")]
    MalformedTask(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}
