//! Test utilities and mock implementations for exercising the listener


use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::monitoring::DebugSink;
use crate::types::{ChangeRecord, RecordPage, ShardDescriptor};

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    pub fn record(shard_id: &str, sequence_number: u64) -> ChangeRecord {
        let mut record = ChangeRecord::new(shard_id, sequence_number.to_string());
        record.event_id = Some(format!("{shard_id}-{sequence_number}"));
        record.event_name = Some("INSERT".to_string());
        record
    }

    pub fn records(shard_id: &str, sequence_numbers: impl IntoIterator<Item = u64>) -> Vec<ChangeRecord> {
        sequence_numbers
            .into_iter()
            .map(|seq| Self::record(shard_id, seq))
            .collect()
    }

    pub fn page(
        shard_id: &str,
        sequence_numbers: impl IntoIterator<Item = u64>,
        next_iterator: Option<&str>,
    ) -> RecordPage {
        RecordPage {
            records: Self::records(shard_id, sequence_numbers),
            next_iterator: next_iterator.map(str::to_string),
        }
    }

    /// Closed parent with two open children, as left behind by a split
    pub fn split_topology(parent: &str, children: [&str; 2]) -> Vec<ShardDescriptor> {
        vec![
            ShardDescriptor::open(parent).closed(),
            ShardDescriptor::open(children[0]).with_parent(parent),
            ShardDescriptor::open(children[1]).with_parent(parent),
        ]
    }
}

/// Debug sink that keeps every message
#[derive(Debug, Clone)]
pub struct CapturedSink {
    sink: DebugSink,
    messages: Arc<Mutex<Vec<String>>>,
}

impl Default for CapturedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturedSink {
    pub fn new() -> Self {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let captured = messages.clone();
        Self {
            sink: DebugSink::new(move |m| captured.lock().push(m.to_string())),
            messages,
        }
    }

    pub fn sink(&self) -> DebugSink {
        self.sink.clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Messages containing every one of `needles`
    pub fn matching(&self, needles: &[&str]) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| needles.iter().all(|n| m.contains(n)))
            .cloned()
            .collect()
    }
}

/// Polls `check` until it holds or `timeout` passes on the tokio clock
pub async fn wait_for_condition<F>(mut check: F, timeout: Duration) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::records("shard-1", [3, 4, 5]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number, SequenceNumber::from("3"));
        assert_eq!(records[2].event_id.as_deref(), Some("shard-1-5"));
        assert!(records.iter().all(|r| r.shard_id == "shard-1"));
    }

    #[test]
    fn test_captured_sink() {
        let captured = CapturedSink::new();
        crate::monitoring::debug_sink!(captured.sink(), "shard {}: failed: {}", "shard-1", "boom");
        assert_eq!(captured.messages(), vec!["shard shard-1: failed: boom"]);
        assert_eq!(captured.matching(&["shard-1", "failed"]).len(), 1);
        assert!(captured.matching(&["shard-2"]).is_empty());
    }
}
