//! Observability hooks for the listener
//!
//! Two surfaces complement the crate's `tracing` output: a [`DebugSink`] that
//! receives human-readable diagnostics, and a [`ShardStatusRegistry`] the host
//! can query for the state of every tracked shard.

mod sink;
mod status;

pub(crate) use sink::debug_sink;
pub use sink::DebugSink;
pub use status::{ShardState, ShardStatus, ShardStatusRegistry};
