//! Shard discovery and poller supervision
//!
//! The [`ShardTracker`] periodically lists the stream's shards, merges the
//! listing into a [`ShardGraph`] and spawns one [`ShardPoller`] task per ready
//! shard. Poller exits are observed through a `JoinSet`, so an exhausted
//! parent promotes its children right away instead of at the next refresh.

mod graph;

pub use graph::{ListingDelta, NodeState, ShardGraph, ShardNode};

use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::StreamClient;
use crate::error::{ListenerError, Result};
use crate::listener::ListenerContext;
use crate::monitoring::{debug_sink, ShardState};
use crate::poller::{PollerOutcome, ShardPoller};
use crate::retry::{RetryError, RetryHandle};
use crate::shutdown;
use crate::types::ChangeRecord;

pub struct ShardTracker<C: StreamClient + ?Sized + 'static> {
    ctx: Arc<ListenerContext<C>>,
    graph: ShardGraph,
    pollers: JoinSet<(String, PollerOutcome)>,
    intake: mpsc::Sender<ChangeRecord>,
    poller_stop: watch::Sender<bool>,
}

impl<C: StreamClient + ?Sized + 'static> ShardTracker<C> {
    pub(crate) fn new(ctx: Arc<ListenerContext<C>>, intake: mpsc::Sender<ChangeRecord>) -> Self {
        let follow_lineage = ctx.options.shard_iterator_type().replays_history();
        let (poller_stop, _) = watch::channel(false);
        Self {
            ctx,
            graph: ShardGraph::new(follow_lineage),
            pollers: JoinSet::new(),
            intake,
            poller_stop,
        }
    }

    /// Tracks the stream until shutdown or a fatal enumeration failure.
    ///
    /// Every poller has stopped by the time this returns, and the tracker's
    /// intake sender is dropped with it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(stream_arn = %self.ctx.stream_arn, "Starting shard tracker");

        let result = self.track(&mut shutdown).await;
        if let Err(e) = &result {
            error!(stream_arn = %self.ctx.stream_arn, error = %e, "Shard tracker failed");
            debug_sink!(self.ctx.options.debug(), "tracker: {}", e);
        }

        self.stop_pollers().await;
        info!(stream_arn = %self.ctx.stream_arn, "Shard tracker stopped");
        result
    }

    async fn track(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        match self.refresh(shutdown).await {
            Err(ListenerError::Shutdown) => return Ok(()),
            other => other?,
        }

        let period = self.ctx.options.shard_refresh_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown::requested(shutdown) => {
                    info!("Shutdown received in shard tracker");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.refresh(shutdown).await {
                        Err(ListenerError::Shutdown) => return Ok(()),
                        other => other?,
                    }
                }
                Some(joined) = self.pollers.join_next(), if !self.pollers.is_empty() => {
                    self.on_poller_exit(joined);
                }
            }
        }
    }

    /// Lists the shards once and starts whatever became ready
    async fn refresh(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let ctx = self.ctx.clone();
        let mut retry = RetryHandle::new(ctx.options.retry_config())
            .with_sink(ctx.options.debug().clone(), "list_shards");

        let listing = match retry
            .retry(|| ctx.client.list_shards(&ctx.stream_arn), shutdown)
            .await
        {
            Ok(listing) => listing,
            Err(RetryError::Interrupted) => return Err(ListenerError::Shutdown),
            Err(e) => {
                return Err(ListenerError::ShardEnumeration(format!(
                    "{}: {}",
                    ctx.stream_arn, e
                )))
            }
        };

        debug!(shard_count = listing.len(), "Listed shards");
        let delta = self.graph.merge_listing(listing);

        for shard_id in &delta.discovered {
            if let Some(node) = self.graph.node(shard_id) {
                info!(
                    shard_id = %shard_id,
                    parents = ?node.descriptor.parent_ids,
                    closed = node.descriptor.closed,
                    "Discovered shard"
                );
                ctx.status.register(shard_id, &node.descriptor.parent_ids);
            }
            debug_sink!(ctx.options.debug(), "shard {}: discovered", shard_id);
        }
        for shard_id in &delta.ignored {
            debug!(shard_id = %shard_id, "Ignoring shard closed before discovery");
            if let Some(node) = self.graph.node(shard_id) {
                ctx.status.register(shard_id, &node.descriptor.parent_ids);
            }
            ctx.status.set_state(shard_id, ShardState::Skipped);
        }
        for shard_id in &delta.pruned {
            debug!(shard_id = %shard_id, "Pruning shard no longer listed");
            ctx.status.remove(shard_id);
        }

        self.spawn_ready();
        Ok(())
    }

    fn spawn_ready(&mut self) {
        for shard_id in self.graph.ready() {
            self.graph.set_state(&shard_id, NodeState::Running);

            let ctx = self.ctx.clone();
            let poller = ShardPoller::new(ctx.clone(), shard_id.clone(), self.intake.clone());
            let stop = self.poller_stop.subscribe();
            self.pollers.spawn(async move {
                let outcome = match AssertUnwindSafe(poller.run(stop)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let err = anyhow!("shard poller panicked: {}", panic_message(&*panic));
                        error!(shard_id = %shard_id, error = %err, "Shard poller panicked");
                        debug_sink!(ctx.options.debug(), "shard {}: failed: {}", shard_id, err);
                        ctx.status.mark_failed(&shard_id, err.to_string());
                        PollerOutcome::Failed(err.into())
                    }
                };
                (shard_id, outcome)
            });
        }
    }

    fn on_poller_exit(&mut self, joined: std::result::Result<(String, PollerOutcome), JoinError>) {
        let (shard_id, outcome) = match joined {
            Ok(exit) => exit,
            Err(e) => {
                // pollers are never aborted and their panics are caught inside
                // the task, so this only happens while the runtime shuts down
                warn!(error = %e, "Shard poller task did not complete");
                return;
            }
        };

        match outcome {
            PollerOutcome::Exhausted => {
                self.graph.set_state(&shard_id, NodeState::Exhausted);
                self.spawn_ready();
            }
            PollerOutcome::Failed(e) => {
                self.graph.set_state(&shard_id, NodeState::Failed);
                let blocked = self.graph.blocked_by_failure();
                if !blocked.is_empty() {
                    warn!(
                        shard_id = %shard_id,
                        error = %e,
                        blocked = ?blocked,
                        "Failed shard holds back its children"
                    );
                }
            }
            PollerOutcome::Cancelled => {
                self.graph.set_state(&shard_id, NodeState::Pending);
            }
        }
    }

    async fn stop_pollers(&mut self) {
        let _ = self.poller_stop.send(true);
        while let Some(joined) = self.pollers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Shard poller task ended abnormally");
            }
        }
        debug!("All shard pollers stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
