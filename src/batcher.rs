//! Fan-in of every shard's records into size- and time-bounded batches
//!
//! The [`Batcher`] is the single consumer of the intake queue. A batch opens
//! with its first record and closes when it is full, when it has been open for
//! `max_batch_wait`, or when the intake closes during shutdown. Delivery to the
//! [`BatchHandler`] is awaited in line, so a slow handler backs up the intake
//! queue and, through it, every poller.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::ListenerError;
use crate::monitoring::{debug_sink, DebugSink};
use crate::options::ListenerOptions;
use crate::types::ChangeRecord;

/// Why a batch was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SizeReached,
    TimeElapsed,
    FlushOnStop,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::SizeReached => "size reached",
            CloseReason::TimeElapsed => "time elapsed",
            CloseReason::FlushOnStop => "flush on stop",
        };
        f.write_str(name)
    }
}

/// A closed batch, handed to the handler exactly once
#[derive(Debug, Clone)]
pub struct Batch {
    /// Starts at 1 and increases by one per delivered batch
    pub id: u64,
    pub records: Vec<ChangeRecord>,
    pub close_reason: CloseReason,
    pub opened_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Receiver of closed batches.
///
/// Any `Fn(Batch) -> impl Future<Output = anyhow::Result<()>>` is a handler.
/// A returned error is reported and the batch is not redelivered.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: Batch) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> BatchHandler for F
where
    F: Fn(Batch) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle_batch(&self, batch: Batch) -> anyhow::Result<()> {
        (self)(batch).await
    }
}

/// Delivery counters returned when the batcher stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub callback_failures: u64,
}

pub struct Batcher<'a, H: BatchHandler + ?Sized> {
    handler: &'a H,
    batch_size: usize,
    max_wait: Duration,
    sink: DebugSink,
    next_id: u64,
    stats: BatcherStats,
}

impl<'a, H: BatchHandler + ?Sized> Batcher<'a, H> {
    pub fn new(handler: &'a H, options: &ListenerOptions) -> Self {
        Self {
            handler,
            batch_size: options.batch_size(),
            max_wait: options.max_batch_wait(),
            sink: options.debug().clone(),
            next_id: 1,
            stats: BatcherStats::default(),
        }
    }

    /// Consumes the intake until every sender is gone
    pub async fn run(mut self, mut intake: mpsc::Receiver<ChangeRecord>) -> BatcherStats {
        debug!(
            batch_size = self.batch_size,
            max_wait_ms = ?self.max_wait.as_millis(),
            "Starting batcher"
        );

        let mut pending: Vec<ChangeRecord> = Vec::with_capacity(self.batch_size);
        let mut opened_at: Option<Instant> = None;

        loop {
            let deadline = opened_at.map(|opened| opened + self.max_wait);

            select! {
                biased;

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(opened) = opened_at.take() {
                        let records = std::mem::take(&mut pending);
                        self.deliver(records, opened, CloseReason::TimeElapsed).await;
                    }
                }
                received = intake.recv() => match received {
                    Some(record) => {
                        let opened = *opened_at.get_or_insert_with(Instant::now);
                        pending.push(record);
                        if pending.len() >= self.batch_size {
                            opened_at = None;
                            let records = std::mem::replace(
                                &mut pending,
                                Vec::with_capacity(self.batch_size),
                            );
                            self.deliver(records, opened, CloseReason::SizeReached).await;
                        }
                    }
                    None => {
                        if let Some(opened) = opened_at.take() {
                            let records = std::mem::take(&mut pending);
                            self.deliver(records, opened, CloseReason::FlushOnStop).await;
                        }
                        break;
                    }
                },
            }
        }

        info!(
            batches = self.stats.batches_delivered,
            records = self.stats.records_delivered,
            callback_failures = self.stats.callback_failures,
            "Batcher stopped"
        );
        self.stats
    }

    async fn deliver(&mut self, records: Vec<ChangeRecord>, opened_at: Instant, reason: CloseReason) {
        if records.is_empty() {
            return;
        }

        let batch = Batch {
            id: self.next_id,
            records,
            close_reason: reason,
            opened_at,
        };
        self.next_id += 1;

        let id = batch.id;
        let size = batch.len();
        trace!(batch_id = id, size = size, reason = %reason, "Delivering batch");

        self.stats.batches_delivered += 1;
        self.stats.records_delivered += size as u64;

        if let Err(e) = self.handler.handle_batch(batch).await {
            self.stats.callback_failures += 1;
            let err = ListenerError::Callback(format!("{:#}", e));
            warn!(batch_id = id, size = size, error = %err, "Batch not delivered");
            debug_sink!(self.sink, "batch {} ({} records): {}", id, size, err);
        }
    }
}
