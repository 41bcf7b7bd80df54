// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::Result;
use ddb_stream_listener::test::mocks::{MockStreamClient, RecordingHandler};
use ddb_stream_listener::test::CapturedSink;
use ddb_stream_listener::{ListenerOptions, ListenerOptionsBuilder, StreamListener};

use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const STREAM_ARN: &str =
    "arn:aws:dynamodb:eu-west-1:111122223333:table/inventory/stream/2024-06-01T12:00:00.000";

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

pub fn create_test_options() -> ListenerOptionsBuilder {
    ListenerOptions::builder()
        .batch_size(10)
        .poll_interval(Duration::from_millis(20))
        .max_batch_wait(Duration::from_millis(100))
        .shard_refresh_interval(Duration::from_millis(50))
        .backoff(Duration::from_millis(5), Duration::from_millis(20))
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

    pub fn listener(&self, options: ListenerOptionsBuilder) -> Result<StreamListener<MockStreamClient>> {
        Ok(StreamListener::new(
            STREAM_ARN,
            options.debug(self.sink.sink()).build(),
            Arc::new(self.client.clone()),
        )?)
    }

    /// Runs the listener in the background with the recording handler
    pub fn start(
        &self,
        options: ListenerOptionsBuilder,
    ) -> Result<(watch::Sender<bool>, JoinHandle<ddb_stream_listener::Result<()>>)> {
        let listener = self.listener(options)?;
        let (tx, rx) = watch::channel(false);
        let handler = self.handler.clone();
        let handle = tokio::spawn(async move { listener.run(handler, rx).await });
        Ok((tx, handle))
    }
}

pub async fn verify_records_delivered(
    handler: &RecordingHandler,
    expected_records: usize,
    timeout: Duration,
) -> Result<()> {
    let start = tokio::time::Instant::now();
    while handler.record_count() < expected_records {
        if start.elapsed() > timeout {
            anyhow::bail!(
                "Timeout waiting for {} records to be delivered, got {}",
                expected_records,
                handler.record_count()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
