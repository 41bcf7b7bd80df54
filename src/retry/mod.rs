//! Retry and backoff for calls against the stream API
//!
//! [`RetryState`] is the per-call state machine (attempt counter, last error,
//! computed delay); [`RetryHandle`] drives an async operation through it while
//! honouring the shutdown signal during calls and backoff sleeps.

mod backoff;
mod error;

pub use backoff::{Backoff, ExponentialBackoff};
pub use error::RetryError;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::client::StreamError;
use crate::monitoring::{debug_sink, DebugSink};
use crate::shutdown;

/// Errors that know whether repeating the call can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        StreamError::is_retryable(self)
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempt budget per call, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial_backoff, self.max_backoff).with_jitter(self.jitter_factor)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Per-call retry bookkeeping
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    last_error: Option<String>,
    delay: Option<Duration>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            delay: None,
        }
    }

    /// Starts the next attempt and returns its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Records a failure of the current attempt and decides what comes next
    pub fn on_failure(&mut self, error: &impl Display, backoff: &impl Backoff) -> RetryDecision {
        self.last_error = Some(error.to_string());
        if self.attempts >= self.max_attempts {
            self.delay = None;
            return RetryDecision::GiveUp;
        }
        let delay = backoff.next_delay(self.attempts);
        self.delay = Some(delay);
        RetryDecision::RetryAfter(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts beyond the first one
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

/// Helper for retrying operations with backoff
pub struct RetryHandle {
    config: RetryConfig,
    backoff: ExponentialBackoff,
    sink: DebugSink,
    scope: String,
    last: RetryState,
}

impl RetryHandle {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            backoff: config.backoff(),
            last: RetryState::new(config.max_attempts),
            config,
            sink: DebugSink::noop(),
            scope: String::from("operation"),
        }
    }

    /// Reports retries and give-ups to `sink`, prefixed with `scope`
    pub fn with_sink(mut self, sink: DebugSink, scope: impl Into<String>) -> Self {
        self.sink = sink;
        self.scope = scope.into();
        self
    }

    /// Retry an operation with backoff
    pub async fn retry<F, Fut, T, E>(
        &mut self,
        mut operation: F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut state = RetryState::new(self.config.max_attempts);
        let result = self.drive(&mut state, &mut operation, shutdown).await;
        self.last = state;
        result
    }

    async fn drive<F, Fut, T, E>(
        &self,
        state: &mut RetryState,
        operation: &mut F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        loop {
            let attempt = state.begin_attempt();
            trace!(scope = %self.scope, attempt = attempt, "Executing operation");

            let result = select! {
                result = operation() => result,
                _ = shutdown::requested(shutdown) => {
                    debug!(scope = %self.scope, "Operation interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            };

            let e = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(scope = %self.scope, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !e.is_retryable() {
                warn!(scope = %self.scope, attempt = attempt, error = %e, "Non-retryable failure");
                debug_sink!(
                    self.sink,
                    "{}: attempt {} failed with non-retryable error: {}",
                    self.scope,
                    attempt,
                    e
                );
                return Err(RetryError::NonRetryable(e));
            }

            match state.on_failure(&e, &self.backoff) {
                RetryDecision::GiveUp => {
                    warn!(
                        scope = %self.scope,
                        attempts = attempt,
                        error = %e,
                        "Maximum retry attempts exceeded"
                    );
                    debug_sink!(
                        self.sink,
                        "{}: giving up after {} attempts: {}",
                        self.scope,
                        attempt,
                        e
                    );
                    return Err(RetryError::MaxRetriesExceeded {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        scope = %self.scope,
                        attempt = attempt,
                        delay_ms = ?delay.as_millis(),
                        error = %e,
                        "Operation failed, retrying after delay"
                    );
                    debug_sink!(
                        self.sink,
                        "{}: attempt {} of {} failed: {}; retrying in {:?}",
                        self.scope,
                        attempt,
                        self.config.max_attempts,
                        e,
                        delay
                    );

                    select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown::requested(shutdown) => {
                            debug!(scope = %self.scope, "Retry interrupted by shutdown signal");
                            return Err(RetryError::Interrupted);
                        }
                    }
                }
            }
        }
    }

    /// State of the most recent call
    pub fn last_state(&self) -> &RetryState {
        &self.last
    }

    /// Attempts made by the most recent call
    pub fn attempts(&self) -> u32 {
        self.last.attempts()
    }
}
