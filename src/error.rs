//! Error types for the stream listener

use thiserror::Error;
use tokio::task::JoinError;

use crate::client::StreamError;
use crate::retry::RetryError;

/// Main error type for listener operations
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shard enumeration failed: {0}")]
    ShardEnumeration(String),

    #[error("Failed to get iterator for shard {shard_id}: {message}")]
    GetIteratorFailed { shard_id: String, message: String },

    #[error("Failed to get records for shard {shard_id}: {message}")]
    GetRecordsFailed { shard_id: String, message: String },

    #[error("Iterator expired for shard {0}")]
    IteratorExpired(String),

    #[error("Maximum retry attempts reached: {0}")]
    MaxRetriesExceeded(String),

    #[error("Batch handler failed: {0}")]
    Callback(String),

    #[error("Shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ListenerError {
    /// Whether the error must stop the whole run rather than a single shard
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ListenerError::Config(_) | ListenerError::ShardEnumeration(_)
        )
    }
}

impl From<RetryError<StreamError>> for ListenerError {
    fn from(err: RetryError<StreamError>) -> Self {
        match err {
            RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => ListenerError::MaxRetriesExceeded(format!(
                "After {} attempts: {}",
                attempts, last_error
            )),
            RetryError::NonRetryable(e) => ListenerError::Other(e.into()),
            RetryError::Interrupted => ListenerError::Shutdown,
        }
    }
}

impl From<JoinError> for ListenerError {
    fn from(err: JoinError) -> Self {
        ListenerError::Other(err.into())
    }
}

/// Result type for listener operations
pub type Result<T> = std::result::Result<T, ListenerError>;
