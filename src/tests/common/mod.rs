use std::sync::Once;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::monitoring::{ShardState, ShardStatusRegistry};
use crate::options::ListenerOptionsBuilder;
use crate::test::mocks::{MockStreamClient, RecordingHandler};
use crate::test::{wait_for_condition, CapturedSink};
use crate::{ListenerOptions, StreamListener};

pub const STREAM_ARN: &str =
    "arn:aws:dynamodb:us-east-1:123456789012:table/orders/stream/2024-01-01T00:00:00.000";

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive("ddb_stream_listener=debug".parse().unwrap())
                    .add_directive("test=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

/// Options tuned for paused-clock tests
pub fn fast_options() -> ListenerOptionsBuilder {
    ListenerOptions::builder()
        .batch_size(10)
        .poll_interval(Duration::from_millis(50))
        .max_batch_wait(Duration::from_millis(200))
        .shard_refresh_interval(Duration::from_millis(100))
        .backoff(Duration::from_millis(10), Duration::from_millis(50))
}

pub struct TestContext {
    pub client: MockStreamClient,
    pub handler: RecordingHandler,
    pub sink: CapturedSink,
}

impl TestContext {
    pub fn new() -> Self {
        init_logging();
        Self {
            client: MockStreamClient::new(),
            handler: RecordingHandler::new(),
            sink: CapturedSink::new(),
        }
    }

    pub fn listener(&self, options: ListenerOptionsBuilder) -> crate::Result<StreamListener<MockStreamClient>> {
        StreamListener::new(
            STREAM_ARN,
            options.debug(self.sink.sink()).build(),
            std::sync::Arc::new(self.client.clone()),
        )
    }

    /// Starts a listener in the background
    pub fn spawn(&self, options: ListenerOptionsBuilder) -> anyhow::Result<RunningListener> {
        let listener = self.listener(options)?;
        let status = listener.status();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handler = self.handler.clone();
        let handle = tokio::spawn(async move { listener.run(handler, shutdown_rx).await });

        Ok(RunningListener {
            shutdown,
            handle,
            status,
        })
    }

    pub async fn wait_for_records(&self, count: usize) -> anyhow::Result<()> {
        let handler = self.handler.clone();
        wait_for_condition(move || handler.record_count() >= count, Duration::from_secs(30)).await
    }
}

pub struct RunningListener {
    pub shutdown: watch::Sender<bool>,
    pub handle: JoinHandle<crate::Result<()>>,
    pub status: ShardStatusRegistry,
}

impl RunningListener {
    pub async fn wait_for_state(&self, shard_id: &str, state: ShardState) -> anyhow::Result<()> {
        let status = self.status.clone();
        let shard_id = shard_id.to_string();
        wait_for_condition(
            move || status.shard(&shard_id).is_some_and(|s| s.state == state),
            Duration::from_secs(30),
        )
        .await
    }

    /// Signals shutdown and waits for `run` to return
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.send(true)?;
        tokio::time::timeout(Duration::from_secs(5), self.handle).await???;
        Ok(())
    }
}
