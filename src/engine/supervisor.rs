use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::processor::KeyProcessor;
use crate::KvStore;
use crate::MetricsSink;
use crate::Watcher;

/// Keeps a watcher running on `prefix` until `producers` is cancelled.
///
/// A watcher ending on its watch timeout is replaced at once; one ending on
/// a stream error is replaced after `restart_delay`. Changes made while no
/// watcher is subscribed are picked up by the crawler.
pub(super) async fn supervise_watcher(
    prefix: String,
    store: Arc<dyn KvStore>,
    processor: KeyProcessor,
    metrics: Arc<dyn MetricsSink>,
    watch_timeout: Duration,
    restart_delay: Duration,
    producers: CancellationToken,
) {
    loop {
        let watcher = Watcher::new(
            prefix.clone(),
            store.clone(),
            processor.clone(),
            metrics.clone(),
            watch_timeout,
            producers.child_token(),
        );
        let result = watcher.run().await;
        if producers.is_cancelled() {
            break;
        }
        match result {
            Ok(()) => debug!(%prefix, "watcher ended, restarting"),
            Err(e) => {
                warn!(%prefix, ?restart_delay, "watcher terminated, restarting: {}", e);
                tokio::select! {
                    _ = producers.cancelled() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }
        }
    }
    debug!(%prefix, "watch supervision stopped");
}
