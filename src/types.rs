//! Domain types shared by the tracker, pollers and batcher

use aws_sdk_dynamodbstreams::types::StreamRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ListenerError;

/// Sequence number of a change record.
///
/// DynamoDB Streams hands these out as decimal strings of up to 40 digits, so
/// they are compared numerically without parsing: a shorter (trimmed) string
/// is always smaller, equal lengths compare lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digits(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.digits(), other.digits());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A shard as reported by "list shards"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub shard_id: String,
    /// Predecessors: one after a split, two after a merge, none for a root
    pub parent_ids: Vec<String>,
    /// A closed shard has an ending sequence number and will never grow
    pub closed: bool,
}

impl ShardDescriptor {
    pub fn open(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_ids: Vec::new(),
            closed: false,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_ids.push(parent_id.into());
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

/// A single change event read from a shard
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub shard_id: String,
    pub sequence_number: SequenceNumber,
    pub event_id: Option<String>,
    /// `INSERT`, `MODIFY` or `REMOVE`
    pub event_name: Option<String>,
    pub approximate_creation_time: Option<DateTime<Utc>>,
    /// Keys and images as delivered by the stream
    pub stream_record: Option<StreamRecord>,
}

impl ChangeRecord {
    pub fn new(shard_id: impl Into<String>, sequence_number: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: SequenceNumber::new(sequence_number),
            event_id: None,
            event_name: None,
            approximate_creation_time: None,
            stream_record: None,
        }
    }
}

/// One page returned by "get records"
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<ChangeRecord>,
    /// `None` signals the end of a closed shard
    pub next_iterator: Option<String>,
}

/// Where a freshly acquired iterator starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardIteratorType {
    /// Oldest record still retained in the shard
    TrimHorizon,
    /// Only records written after the iterator was created
    #[default]
    Latest,
    /// At a caller-supplied sequence number
    AtSequenceNumber,
    /// Just after a caller-supplied sequence number
    AfterSequenceNumber,
}

impl ShardIteratorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardIteratorType::TrimHorizon => "TRIM_HORIZON",
            ShardIteratorType::Latest => "LATEST",
            ShardIteratorType::AtSequenceNumber => "AT_SEQUENCE_NUMBER",
            ShardIteratorType::AfterSequenceNumber => "AFTER_SEQUENCE_NUMBER",
        }
    }

    /// Whether lineage matters: every type except `LATEST` replays history,
    /// so children have to wait for their parents to drain.
    pub fn replays_history(&self) -> bool {
        !matches!(self, ShardIteratorType::Latest)
    }

    /// Whether the type needs a sequence number to position the iterator
    pub fn requires_sequence_number(&self) -> bool {
        matches!(
            self,
            ShardIteratorType::AtSequenceNumber | ShardIteratorType::AfterSequenceNumber
        )
    }
}

impl fmt::Display for ShardIteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardIteratorType {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRIM_HORIZON" => Ok(ShardIteratorType::TrimHorizon),
            "LATEST" => Ok(ShardIteratorType::Latest),
            "AT_SEQUENCE_NUMBER" => Ok(ShardIteratorType::AtSequenceNumber),
            "AFTER_SEQUENCE_NUMBER" => Ok(ShardIteratorType::AfterSequenceNumber),
            other => Err(ListenerError::Config(format!(
                "unknown shard iterator type: {other:?}"
            ))),
        }
    }
}

impl From<ShardIteratorType> for aws_sdk_dynamodbstreams::types::ShardIteratorType {
    fn from(value: ShardIteratorType) -> Self {
        use aws_sdk_dynamodbstreams::types::ShardIteratorType as Sdk;
        match value {
            ShardIteratorType::TrimHorizon => Sdk::TrimHorizon,
            ShardIteratorType::Latest => Sdk::Latest,
            ShardIteratorType::AtSequenceNumber => Sdk::AtSequenceNumber,
            ShardIteratorType::AfterSequenceNumber => Sdk::AfterSequenceNumber,
        }
    }
}
