//! Per-shard consumption
//!
//! A [`ShardPoller`] owns the [`Cursor`] of one shard and walks it through
//! `Uninitialized → Iterating → (Exhausted | Failed)`, pushing every record
//! onto the shared intake queue in sequence order. Pollers never share state
//! with each other; the only thing they have in common is the intake sender.

use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::client::{StreamClient, StreamError};
use crate::error::ListenerError;
use crate::listener::ListenerContext;
use crate::monitoring::{debug_sink, ShardState};
use crate::retry::{RetryError, RetryHandle};
use crate::shutdown;
use crate::types::{ChangeRecord, SequenceNumber, ShardIteratorType};

/// Read position of a single shard
#[derive(Debug, Clone)]
pub struct Cursor {
    shard_id: String,
    iterator: Option<String>,
    last_sequence_number: Option<SequenceNumber>,
    exhausted: bool,
}

impl Cursor {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            iterator: None,
            last_sequence_number: None,
            exhausted: false,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn iterator(&self) -> Option<&str> {
        self.iterator.as_deref()
    }

    pub fn last_sequence_number(&self) -> Option<&SequenceNumber> {
        self.last_sequence_number.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn set_iterator(&mut self, iterator: String) {
        self.iterator = Some(iterator);
    }

    /// Drops a token the service no longer accepts
    pub fn invalidate(&mut self) {
        self.iterator = None;
    }

    pub fn mark_exhausted(&mut self) {
        self.iterator = None;
        self.exhausted = true;
    }

    /// Advances past `sequence_number`; false for a record already delivered
    pub fn accept(&mut self, sequence_number: &SequenceNumber) -> bool {
        match &self.last_sequence_number {
            Some(last) if sequence_number <= last => false,
            _ => {
                self.last_sequence_number = Some(sequence_number.clone());
                true
            }
        }
    }
}

/// How a poller ended
#[derive(Debug)]
pub enum PollerOutcome {
    Exhausted,
    Failed(ListenerError),
    Cancelled,
}

enum PollerState {
    Uninitialized,
    Iterating,
    Exhausted,
    Failed(ListenerError),
}

enum PollStep {
    Continue,
    Reacquire,
    Exhausted,
    Failed(ListenerError),
    Cancelled,
}

pub struct ShardPoller<C: StreamClient + ?Sized> {
    ctx: Arc<ListenerContext<C>>,
    cursor: Cursor,
    intake: mpsc::Sender<ChangeRecord>,
    expired_streak: u32,
}

impl<C: StreamClient + ?Sized> ShardPoller<C> {
    pub(crate) fn new(
        ctx: Arc<ListenerContext<C>>,
        shard_id: impl Into<String>,
        intake: mpsc::Sender<ChangeRecord>,
    ) -> Self {
        Self {
            ctx,
            cursor: Cursor::new(shard_id),
            intake,
            expired_streak: 0,
        }
    }

    /// Consumes the shard until it is exhausted, fails or shutdown is requested
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollerOutcome {
        let shard_id = self.cursor.shard_id().to_string();
        info!(shard_id = %shard_id, "Starting shard poller");
        debug_sink!(self.ctx.options.debug(), "shard {}: poller started", shard_id);
        self.ctx.status.set_state(&shard_id, ShardState::Uninitialized);

        let mut state = PollerState::Uninitialized;
        let outcome = loop {
            if shutdown::is_requested(&shutdown) {
                break PollerOutcome::Cancelled;
            }

            state = match state {
                PollerState::Uninitialized => match self.acquire_iterator(&mut shutdown).await {
                    Ok(Some(iterator)) => {
                        self.cursor.set_iterator(iterator);
                        self.ctx.status.set_state(&shard_id, ShardState::Iterating);
                        PollerState::Iterating
                    }
                    Ok(None) => {
                        debug!(shard_id = %shard_id, "No iterator returned, shard has nothing left");
                        self.cursor.mark_exhausted();
                        PollerState::Exhausted
                    }
                    Err(RetryError::Interrupted) => break PollerOutcome::Cancelled,
                    Err(e) => PollerState::Failed(ListenerError::GetIteratorFailed {
                        shard_id: shard_id.clone(),
                        message: ListenerError::from(e).to_string(),
                    }),
                },
                PollerState::Iterating => match self.poll_once(&mut shutdown).await {
                    PollStep::Continue => PollerState::Iterating,
                    PollStep::Reacquire => PollerState::Uninitialized,
                    PollStep::Exhausted => PollerState::Exhausted,
                    PollStep::Failed(e) => PollerState::Failed(e),
                    PollStep::Cancelled => break PollerOutcome::Cancelled,
                },
                PollerState::Exhausted => break PollerOutcome::Exhausted,
                PollerState::Failed(e) => break PollerOutcome::Failed(e),
            };
        };

        match &outcome {
            PollerOutcome::Exhausted => {
                info!(shard_id = %shard_id, "Shard exhausted");
                debug_sink!(self.ctx.options.debug(), "shard {}: exhausted", shard_id);
                self.ctx.status.set_state(&shard_id, ShardState::Exhausted);
            }
            PollerOutcome::Failed(e) => {
                error!(shard_id = %shard_id, error = %e, "Shard poller failed");
                debug_sink!(self.ctx.options.debug(), "shard {}: failed: {}", shard_id, e);
                self.ctx.status.mark_failed(&shard_id, e.to_string());
            }
            PollerOutcome::Cancelled => {
                info!(shard_id = %shard_id, "Shutdown received, stopping shard poller");
                self.ctx.status.set_state(&shard_id, ShardState::Cancelled);
            }
        }

        outcome
    }

    /// Where a new iterator should start.
    ///
    /// Once something was delivered the cursor resumes right after it, whatever
    /// the configured type; this is what makes iterator renewal lossless.
    fn start_position(&self) -> (ShardIteratorType, Option<String>) {
        if let Some(last) = self.cursor.last_sequence_number() {
            return (
                ShardIteratorType::AfterSequenceNumber,
                Some(last.as_str().to_string()),
            );
        }

        let options = &self.ctx.options;
        let iterator_type = options.shard_iterator_type();
        if !iterator_type.requires_sequence_number() {
            return (iterator_type, None);
        }

        match options.starting_sequence_number(self.cursor.shard_id()) {
            Some(seq) => (iterator_type, Some(seq.to_string())),
            // shards without a caller position are new since it was taken
            None => (ShardIteratorType::TrimHorizon, None),
        }
    }

    async fn acquire_iterator(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<String>, RetryError<StreamError>> {
        let (iterator_type, sequence_number) = self.start_position();
        let shard_id = self.cursor.shard_id().to_string();
        debug!(
            shard_id = %shard_id,
            iterator_type = %iterator_type,
            sequence_number = ?sequence_number,
            "Acquiring shard iterator"
        );

        let ctx = &self.ctx;
        let mut retry = RetryHandle::new(ctx.options.retry_config())
            .with_sink(
                ctx.options.debug().clone(),
                format!("shard {} get_shard_iterator", shard_id),
            );

        let result = retry
            .retry(
                || {
                    ctx.client.get_shard_iterator(
                        &ctx.stream_arn,
                        &shard_id,
                        iterator_type,
                        sequence_number.as_deref(),
                    )
                },
                shutdown,
            )
            .await;

        ctx.status.add_retries(
            &shard_id,
            u64::from(retry.last_state().retries()),
            result.as_ref().err().map(ToString::to_string),
        );
        result
    }

    async fn poll_once(&mut self, shutdown: &mut watch::Receiver<bool>) -> PollStep {
        let shard_id = self.cursor.shard_id().to_string();
        let Some(iterator) = self.cursor.iterator().map(str::to_string) else {
            return PollStep::Reacquire;
        };

        let ctx = self.ctx.clone();
        let limit = ctx.options.batch_size() as i32;
        let mut retry = RetryHandle::new(ctx.options.retry_config())
            .with_sink(
                ctx.options.debug().clone(),
                format!("shard {} get_records", shard_id),
            );

        let result = retry
            .retry(
                || ctx.client.get_records(&shard_id, &iterator, limit),
                shutdown,
            )
            .await;

        ctx.status.add_retries(
            &shard_id,
            u64::from(retry.last_state().retries()),
            result.as_ref().err().map(ToString::to_string),
        );

        let page = match result {
            Ok(page) => page,
            Err(RetryError::NonRetryable(e)) if e.is_expired_iterator() => {
                self.expired_streak += 1;
                warn!(
                    shard_id = %shard_id,
                    expirations = self.expired_streak,
                    "Iterator expired, acquiring a fresh one"
                );
                debug_sink!(
                    ctx.options.debug(),
                    "shard {}: iterator expired (attempt {}), acquiring a fresh one",
                    shard_id,
                    self.expired_streak
                );
                if self.expired_streak > ctx.options.retry_count() {
                    return PollStep::Failed(ListenerError::IteratorExpired(shard_id));
                }
                self.cursor.invalidate();
                ctx.status.iterator_renewed(&shard_id);
                return PollStep::Reacquire;
            }
            Err(RetryError::Interrupted) => return PollStep::Cancelled,
            Err(e) => {
                return PollStep::Failed(ListenerError::GetRecordsFailed {
                    shard_id,
                    message: ListenerError::from(e).to_string(),
                })
            }
        };

        self.expired_streak = 0;
        let had_records = !page.records.is_empty();
        trace!(
            shard_id = %shard_id,
            record_count = page.records.len(),
            has_next = page.next_iterator.is_some(),
            "Fetched page"
        );

        for record in page.records {
            if !self.cursor.accept(&record.sequence_number) {
                debug!(
                    shard_id = %shard_id,
                    sequence = %record.sequence_number,
                    "Skipping already delivered record"
                );
                continue;
            }

            let sequence_number = record.sequence_number.clone();
            select! {
                sent = self.intake.send(record) => {
                    if sent.is_err() {
                        debug!(shard_id = %shard_id, "Intake closed");
                        return PollStep::Cancelled;
                    }
                }
                _ = shutdown::requested(shutdown) => return PollStep::Cancelled,
            }
            ctx.status.record_emitted(&shard_id, &sequence_number);
        }

        match page.next_iterator {
            Some(next) => self.cursor.set_iterator(next),
            None => {
                self.cursor.mark_exhausted();
                return PollStep::Exhausted;
            }
        }

        if !had_records {
            select! {
                _ = tokio::time::sleep(ctx.options.poll_interval()) => {}
                _ = shutdown::requested(shutdown) => return PollStep::Cancelled,
            }
        }

        PollStep::Continue
    }
}
