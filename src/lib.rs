//! DynamoDB Streams listener
//!
//! Consumes every shard of a change stream, honours shard lineage after splits
//! and merges, and hands the change records to a caller-supplied handler in
//! size- and time-bounded batches. Remote calls are retried with exponential
//! backoff; a shard that keeps failing is reported and dropped without taking
//! its siblings down.

pub mod batcher;
pub mod client;
pub mod error;
pub mod listener;
pub mod monitoring;
pub mod options;
pub mod poller;
pub mod retry;
mod shutdown;
pub mod tracker;
pub mod types;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;
#[cfg(test)]
mod tests;

pub use batcher::{Batch, BatchHandler, BatcherStats, CloseReason};
pub use client::{client_from_env, StreamClient, StreamError};
pub use error::{ListenerError, Result};
pub use listener::StreamListener;
pub use monitoring::{DebugSink, ShardState, ShardStatus, ShardStatusRegistry};
pub use options::{ListenerOptions, ListenerOptionsBuilder, ListenerSettings};
pub use retry::{Backoff, ExponentialBackoff, RetryConfig, RetryError};
pub use types::{ChangeRecord, RecordPage, SequenceNumber, ShardDescriptor, ShardIteratorType};
