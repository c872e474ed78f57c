//! Push-based change detection over one prefix.


use std::collections::HashMap;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::METADATA_SOURCE;
use crate::constants::SOURCE_WATCHER;
use crate::processor::KeyProcessor;
use crate::processor::Metadata;
use crate::Error;
use crate::KvStore;
use crate::MetricsSink;
use crate::Result;
use crate::StoreReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatcherState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl WatcherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WatcherState::Running,
            1 => WatcherState::Stopping,
            _ => WatcherState::Stopped,
        }
    }
}

/// Watches one prefix and feeds every change to the [`KeyProcessor`].
///
/// A watcher runs at most once. A terminal stream error ends [`run`] with
/// [`Error::WatchStream`]; reconnecting means starting a new watcher.
///
/// [`run`]: Watcher::run
pub struct Watcher {
    prefix: String,
    store: Arc<dyn KvStore>,
    processor: KeyProcessor,
    metrics: Arc<dyn MetricsSink>,
    /// Zero means unbounded
    timeout: Duration,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Watcher {
    pub fn new(
        prefix: impl Into<String>,
        store: Arc<dyn KvStore>,
        processor: KeyProcessor,
        metrics: Arc<dyn MetricsSink>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            store,
            processor,
            metrics,
            timeout,
            state: AtomicU8::new(WatcherState::Running as u8),
            cancel,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Requests the run loop to end. Idempotent and safe from any task.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            WatcherState::Running as u8,
            WatcherState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.cancel.cancel();
    }

    /// Consumes the watch stream until stopped, the watch timeout elapses,
    /// or the stream fails. Also fails once the work channel is closed.
    pub async fn run(&self) -> Result<()> {
        let result = self.watch().await;
        self.state.store(WatcherState::Stopped as u8, Ordering::Release);
        result
    }

    async fn watch(&self) -> Result<()> {
        if self.state() != WatcherState::Running {
            return Ok(());
        }
        let mut stream = self.store.watch(&self.prefix).await.map_err(|source| Error::WatchStream {
            prefix: self.prefix.clone(),
            source,
        })?;
        info!(prefix = %self.prefix, "watch started");

        let metadata: Metadata = HashMap::from([(METADATA_SOURCE.to_string(), SOURCE_WATCHER.to_string())]);
        let reader = StoreReader::new(self.store.clone(), self.cancel.clone());
        let deadline = (!self.timeout.is_zero()).then(|| tokio::time::Instant::now() + self.timeout);
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending().await,
            }
        };
        tokio::pin!(expired);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(prefix = %self.prefix, "watch cancelled");
                    return Ok(());
                }
                _ = &mut expired => {
                    debug!(prefix = %self.prefix, "watch timeout elapsed");
                    return Ok(());
                }
                event = stream.next() => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(source)) => {
                    warn!(prefix = %self.prefix, "watch stream failed: {:?}", source);
                    return Err(Error::WatchStream {
                        prefix: self.prefix.clone(),
                        source,
                    });
                }
                None => {
                    warn!(prefix = %self.prefix, "watch stream ended");
                    return Err(Error::WatchStream {
                        prefix: self.prefix.clone(),
                        source: crate::StoreError::Other("watch stream ended".to_string()),
                    });
                }
            };

            self.metrics.watch_event(&self.prefix);
            if let Err(e) = self
                .processor
                .process_key(&event.key, event.value.as_deref(), &reader, &metadata)
                .await
            {
                warn!(prefix = %self.prefix, key = %event.key, "dispatch stopped: {}", e);
                return Err(e);
            }
        }
    }
}
