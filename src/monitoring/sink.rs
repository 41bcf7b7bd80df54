use std::fmt;
use std::sync::Arc;

/// Receiver for human-readable diagnostics.
///
/// The listener reports retries, failures and lifecycle transitions here in
/// addition to its `tracing` output, so hosts without a subscriber still get
/// to see them. No schema is implied; every message is a single line.
#[derive(Clone)]
pub struct DebugSink {
    inner: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl DebugSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            inner: Some(Arc::new(f)),
        }
    }

    /// Discards every message
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Forwards every message to `tracing::debug!`
    pub fn tracing() -> Self {
        Self::new(|message| tracing::debug!(target: "ddb_stream_listener::debug", "{}", message))
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    pub fn emit(&self, args: fmt::Arguments<'_>) {
        if let Some(f) = &self.inner {
            f(&args.to_string());
        }
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSink")
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// Formats a message into a [`DebugSink`] without allocating when it is a no-op
macro_rules! debug_sink {
    ($sink:expr, $($arg:tt)+) => {
        $sink.emit(format_args!($($arg)+))
    };
}

pub(crate) use debug_sink;

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_sink_collects_messages() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let captured = messages.clone();
        let sink = DebugSink::new(move |m| captured.lock().push(m.to_string()));

        debug_sink!(sink, "shard {} attempt {}", "shard-1", 2);

        assert_eq!(messages.lock().as_slice(), ["shard shard-1 attempt 2"]);
        assert!(!sink.is_noop());
    }

    #[test]
    fn test_noop_sink() {
        let sink = DebugSink::default();
        assert!(sink.is_noop());
        debug_sink!(sink, "dropped {}", 1);
    }
}
