//! The listener engine
//!
//! [`StreamListener`] wires a [`ShardTracker`] and a [`Batcher`] together over
//! one bounded intake queue and runs them until the shutdown signal fires.
//!
//! # Example
//!
//! ```no_run
//! use ddb_stream_listener::{Batch, ListenerOptions, ShardIteratorType, StreamListener};
//! use std::time::Duration;
//! use tokio::sync::watch;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let options = ListenerOptions::builder()
//!     .batch_size(500)
//!     .max_batch_wait(Duration::from_secs(2))
//!     .shard_iterator_type(ShardIteratorType::TrimHorizon)
//!     .build();
//!
//! let listener = StreamListener::from_env(
//!     "arn:aws:dynamodb:us-east-1:123456789012:table/orders/stream/2024-01-01T00:00:00.000",
//!     options,
//! )
//! .await?;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     let _ = shutdown_tx.send(true);
//! });
//!
//! listener
//!     .run(
//!         |batch: Batch| async move {
//!             println!("batch {} with {} records", batch.id, batch.len());
//!             anyhow::Ok(())
//!         },
//!         shutdown_rx,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::batcher::{BatchHandler, Batcher};
use crate::client::{client_from_env, StreamClient};
use crate::error::{ListenerError, Result};
use crate::monitoring::ShardStatusRegistry;
use crate::options::ListenerOptions;
use crate::tracker::ShardTracker;

/// State shared by the tracker and every poller
pub(crate) struct ListenerContext<C: ?Sized> {
    pub(crate) stream_arn: String,
    pub(crate) options: ListenerOptions,
    pub(crate) status: ShardStatusRegistry,
    pub(crate) client: Arc<C>,
}

pub struct StreamListener<C: StreamClient + ?Sized + 'static> {
    ctx: Arc<ListenerContext<C>>,
}

impl StreamListener<aws_sdk_dynamodbstreams::Client> {
    /// Builds a listener on a client configured from the environment
    pub async fn from_env(stream_arn: impl Into<String>, options: ListenerOptions) -> Result<Self> {
        let client = client_from_env().await;
        Self::new(stream_arn, options, Arc::new(client))
    }
}

impl<C: StreamClient + ?Sized + 'static> StreamListener<C> {
    /// Fails with [`ListenerError::Config`] before anything is spawned when the
    /// options cannot work for this stream.
    pub fn new(stream_arn: impl Into<String>, options: ListenerOptions, client: Arc<C>) -> Result<Self> {
        let stream_arn = stream_arn.into();
        if stream_arn.trim().is_empty() {
            return Err(ListenerError::Config("stream ARN must not be empty".to_string()));
        }
        options.validate()?;

        Ok(Self {
            ctx: Arc::new(ListenerContext {
                stream_arn,
                options,
                status: ShardStatusRegistry::new(),
                client,
            }),
        })
    }

    pub fn stream_arn(&self) -> &str {
        &self.ctx.stream_arn
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.ctx.options
    }

    /// Live view of every tracked shard
    pub fn status(&self) -> ShardStatusRegistry {
        self.ctx.status.clone()
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Records still queued when shutdown arrives are delivered in one final
    /// batch before this returns. Only configuration and shard enumeration
    /// failures are returned as errors; shard-level failures are reported
    /// through the debug sink and [`status`](Self::status).
    pub async fn run<H: BatchHandler>(&self, handler: H, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.ctx.options.validate()?;
        info!(
            stream_arn = %self.ctx.stream_arn,
            iterator_type = %self.ctx.options.shard_iterator_type(),
            batch_size = self.ctx.options.batch_size(),
            "Starting stream listener"
        );

        let (intake_tx, intake_rx) = mpsc::channel(self.ctx.options.batch_size());
        let tracker = ShardTracker::new(self.ctx.clone(), intake_tx);
        let tracker_task = tokio::spawn(tracker.run(shutdown));

        let batcher = Batcher::new(&handler, &self.ctx.options);
        let (tracker_result, stats) = tokio::join!(
            async { tracker_task.await? },
            batcher.run(intake_rx)
        );

        info!(
            stream_arn = %self.ctx.stream_arn,
            batches = stats.batches_delivered,
            records = stats.records_delivered,
            callback_failures = stats.callback_failures,
            "Stream listener stopped"
        );
        tracker_result
    }
}
