//! Listener configuration
//!
//! | option                      | default      | effect                                                   |
//! |-----------------------------|--------------|----------------------------------------------------------|
//! | `batch_size`                | 100 (1–1000) | max records per delivered batch and per `GetRecords` page |
//! | `poll_interval`             | 5s           | pause after an empty page before polling the shard again |
//! | `max_batch_wait`            | 5s           | latency cap of a non-empty open batch                    |
//! | `retry_count`               | 3            | attempts per remote call, the first one included         |
//! | `shard_iterator_type`       | `LATEST`     | where new iterators start; anything but `LATEST` replays lineage |
//! | `starting_sequence_numbers` | empty        | per-shard positions for `AT_`/`AFTER_SEQUENCE_NUMBER`    |
//! | `shard_refresh_interval`    | 10s          | spacing of shard discovery                               |
//! | `initial_backoff`           | 100ms        | first retry delay, doubled on every further failure      |
//! | `max_backoff`               | 5s           | cap of the retry delay                                   |
//! | `debug`                     | no-op        | receiver of human-readable diagnostics                   |
//!
//! Out-of-range values are replaced by their defaults when the options are
//! built; a zero duration always means "use the default".

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ListenerError, Result};
use crate::monitoring::DebugSink;
use crate::retry::RetryConfig;
use crate::types::ShardIteratorType;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_SHARD_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Validated, immutable listener options
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    batch_size: usize,
    poll_interval: Duration,
    max_batch_wait: Duration,
    retry_count: u32,
    shard_iterator_type: ShardIteratorType,
    starting_sequence_numbers: HashMap<String, String>,
    shard_refresh_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    debug: DebugSink,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ListenerOptions {
    pub fn builder() -> ListenerOptionsBuilder {
        ListenerOptionsBuilder::default()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_batch_wait(&self) -> Duration {
        self.max_batch_wait
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn shard_iterator_type(&self) -> ShardIteratorType {
        self.shard_iterator_type
    }

    /// Caller-supplied start position for `shard_id`, if any
    pub fn starting_sequence_number(&self, shard_id: &str) -> Option<&str> {
        self.starting_sequence_numbers
            .get(shard_id)
            .map(String::as_str)
    }

    pub fn shard_refresh_interval(&self) -> Duration {
        self.shard_refresh_interval
    }

    pub fn debug(&self) -> &DebugSink {
        &self.debug
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_count,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            ..Default::default()
        }
    }

    /// Checks the combinations normalization cannot repair
    pub fn validate(&self) -> Result<()> {
        if self.shard_iterator_type.requires_sequence_number()
            && self.starting_sequence_numbers.is_empty()
        {
            return Err(ListenerError::Config(format!(
                "{} requires at least one starting sequence number",
                self.shard_iterator_type
            )));
        }

        if let Some((shard_id, _)) = self
            .starting_sequence_numbers
            .iter()
            .find(|(_, seq)| seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(ListenerError::Config(format!(
                "invalid starting sequence number for shard {shard_id}"
            )));
        }

        Ok(())
    }
}

/// Builder collecting raw option values; [`build`](Self::build) normalizes them
#[derive(Debug, Clone, Default)]
pub struct ListenerOptionsBuilder {
    batch_size: Option<i64>,
    poll_interval: Option<Duration>,
    max_batch_wait: Option<Duration>,
    retry_count: Option<i64>,
    shard_iterator_type: Option<ShardIteratorType>,
    starting_sequence_numbers: HashMap<String, String>,
    shard_refresh_interval: Option<Duration>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    debug: Option<DebugSink>,
}

impl ListenerOptionsBuilder {
    pub fn batch_size(mut self, n: i64) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn max_batch_wait(mut self, wait: Duration) -> Self {
        self.max_batch_wait = Some(wait);
        self
    }

    pub fn retry_count(mut self, n: i64) -> Self {
        self.retry_count = Some(n);
        self
    }

    pub fn shard_iterator_type(mut self, iterator_type: ShardIteratorType) -> Self {
        self.shard_iterator_type = Some(iterator_type);
        self
    }

    pub fn starting_sequence_number(
        mut self,
        shard_id: impl Into<String>,
        sequence_number: impl Into<String>,
    ) -> Self {
        self.starting_sequence_numbers
            .insert(shard_id.into(), sequence_number.into());
        self
    }

    pub fn shard_refresh_interval(mut self, interval: Duration) -> Self {
        self.shard_refresh_interval = Some(interval);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = Some(initial);
        self.max_backoff = Some(max);
        self
    }

    pub fn debug(mut self, sink: DebugSink) -> Self {
        self.debug = Some(sink);
        self
    }

    pub fn build(self) -> ListenerOptions {
        let initial_backoff = positive_or(self.initial_backoff, DEFAULT_INITIAL_BACKOFF);
        let max_backoff = positive_or(self.max_backoff, DEFAULT_MAX_BACKOFF).max(initial_backoff);

        ListenerOptions {
            batch_size: self
                .batch_size
                .filter(|n| (1..=MAX_BATCH_SIZE as i64).contains(n))
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            poll_interval: positive_or(self.poll_interval, DEFAULT_INTERVAL),
            max_batch_wait: positive_or(self.max_batch_wait, DEFAULT_INTERVAL),
            retry_count: self
                .retry_count
                .filter(|n| *n > 0)
                .map(|n| n.min(u32::MAX as i64) as u32)
                .unwrap_or(DEFAULT_RETRY_COUNT),
            shard_iterator_type: self.shard_iterator_type.unwrap_or_default(),
            starting_sequence_numbers: self.starting_sequence_numbers,
            shard_refresh_interval: positive_or(
                self.shard_refresh_interval,
                DEFAULT_SHARD_REFRESH_INTERVAL,
            ),
            initial_backoff,
            max_backoff,
            debug: self.debug.unwrap_or_default(),
        }
    }
}

fn positive_or(value: Option<Duration>, default: Duration) -> Duration {
    value.filter(|d| !d.is_zero()).unwrap_or(default)
}

/// Raw settings as they appear in a host configuration file.
///
/// Durations are in milliseconds; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerSettings {
    pub batch_size: Option<i64>,
    pub poll_interval_ms: Option<u64>,
    pub max_batch_wait_ms: Option<u64>,
    pub retry_count: Option<i64>,
    pub shard_iterator_type: Option<String>,
    pub starting_sequence_numbers: HashMap<String, String>,
    pub shard_refresh_interval_ms: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl ListenerSettings {
    /// Converts into options; the debug sink still has to be attached by code
    pub fn into_options(self) -> Result<ListenerOptions> {
        self.into_builder().map(ListenerOptionsBuilder::build)
    }

    pub fn into_builder(self) -> Result<ListenerOptionsBuilder> {
        let mut builder = ListenerOptions::builder();

        if let Some(n) = self.batch_size {
            builder = builder.batch_size(n);
        }
        if let Some(ms) = self.poll_interval_ms {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_batch_wait_ms {
            builder = builder.max_batch_wait(Duration::from_millis(ms));
        }
        if let Some(n) = self.retry_count {
            builder = builder.retry_count(n);
        }
        if let Some(raw) = self.shard_iterator_type.filter(|s| !s.trim().is_empty()) {
            builder = builder.shard_iterator_type(raw.parse()?);
        }
        for (shard_id, seq) in self.starting_sequence_numbers {
            builder = builder.starting_sequence_number(shard_id, seq);
        }
        if let Some(ms) = self.shard_refresh_interval_ms {
            builder = builder.shard_refresh_interval(Duration::from_millis(ms));
        }
        builder.initial_backoff = self.initial_backoff_ms.map(Duration::from_millis);
        builder.max_backoff = self.max_backoff_ms.map(Duration::from_millis);

        Ok(builder)
    }
}
