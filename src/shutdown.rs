//! Cooperative cancellation helpers shared by every worker

use tokio::sync::watch;

/// Resolves once the shutdown flag turns `true`.
///
/// A dropped sender can never signal again, so it counts as a shutdown
/// request too.
pub(crate) async fn requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Non-blocking check of the current flag
pub(crate) fn is_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
