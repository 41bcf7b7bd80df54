use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("Maximum retries ({attempts}) exceeded: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },

    #[error("Non-retryable failure: {0}")]
    NonRetryable(E),

    #[error("Retry interrupted by shutdown signal")]
    Interrupted,
}
