use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::types::SequenceNumber;

/// Lifecycle of a tracked shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardState {
    /// Discovered, waiting for its parents to drain
    Pending,
    /// Closed at discovery under `LATEST`; never read
    Skipped,
    /// Poller started, no iterator yet
    Uninitialized,
    /// Poller is reading pages
    Iterating,
    /// Every record of the shard has been emitted
    Exhausted,
    /// Poller gave up; see [`ShardStatus::last_error`]
    Failed,
    /// Poller stopped by shutdown before reaching the end
    Cancelled,
}

impl ShardState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShardState::Exhausted | ShardState::Failed | ShardState::Skipped
        )
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShardState::Pending => "pending",
            ShardState::Skipped => "skipped",
            ShardState::Uninitialized => "uninitialized",
            ShardState::Iterating => "iterating",
            ShardState::Exhausted => "exhausted",
            ShardState::Failed => "failed",
            ShardState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Per-shard view exposed to the host
#[derive(Debug, Clone)]
pub struct ShardStatus {
    pub state: ShardState,
    pub parent_ids: Vec<String>,
    pub records_emitted: u64,
    pub retries: u64,
    pub iterator_renewals: u64,
    pub last_sequence_number: Option<SequenceNumber>,
    pub last_error: Option<String>,
    pub last_updated: SystemTime,
}

impl ShardStatus {
    fn new(parent_ids: Vec<String>) -> Self {
        Self {
            state: ShardState::Pending,
            parent_ids,
            records_emitted: 0,
            retries: 0,
            iterator_renewals: 0,
            last_sequence_number: None,
            last_error: None,
            last_updated: SystemTime::now(),
        }
    }
}

/// Shared, cheaply clonable registry of shard statuses.
///
/// Written by the tracker and the pollers, read by whoever holds a clone.
#[derive(Debug, Clone, Default)]
pub struct ShardStatusRegistry {
    shards: Arc<RwLock<HashMap<String, ShardStatus>>>,
}

impl ShardStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, shard_id: &str, parent_ids: &[String]) {
        self.shards
            .write()
            .entry(shard_id.to_string())
            .or_insert_with(|| ShardStatus::new(parent_ids.to_vec()));
    }

    pub(crate) fn remove(&self, shard_id: &str) {
        self.shards.write().remove(shard_id);
    }

    fn update(&self, shard_id: &str, f: impl FnOnce(&mut ShardStatus)) {
        let mut shards = self.shards.write();
        let status = shards
            .entry(shard_id.to_string())
            .or_insert_with(|| ShardStatus::new(Vec::new()));
        f(status);
        status.last_updated = SystemTime::now();
    }

    pub(crate) fn set_state(&self, shard_id: &str, state: ShardState) {
        self.update(shard_id, |status| status.state = state);
    }

    pub(crate) fn mark_failed(&self, shard_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(shard_id, |status| {
            status.state = ShardState::Failed;
            status.last_error = Some(error);
        });
    }

    pub(crate) fn record_emitted(&self, shard_id: &str, sequence_number: &SequenceNumber) {
        self.update(shard_id, |status| {
            status.records_emitted += 1;
            status.last_sequence_number = Some(sequence_number.clone());
        });
    }

    pub(crate) fn add_retries(&self, shard_id: &str, retries: u64, error: Option<String>) {
        if retries == 0 && error.is_none() {
            return;
        }
        self.update(shard_id, |status| {
            status.retries += retries;
            if error.is_some() {
                status.last_error = error;
            }
        });
    }

    pub(crate) fn iterator_renewed(&self, shard_id: &str) {
        self.update(shard_id, |status| status.iterator_renewals += 1);
    }

    /// Status of one shard, if it is tracked
    pub fn shard(&self, shard_id: &str) -> Option<ShardStatus> {
        self.shards.read().get(shard_id).cloned()
    }

    /// Point-in-time copy of every tracked shard
    pub fn snapshot(&self) -> HashMap<String, ShardStatus> {
        self.shards.read().clone()
    }

    /// Ids of shards currently in `state`, sorted
    pub fn shards_in(&self, state: ShardState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .read()
            .iter()
            .filter(|(_, status)| status.state == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
