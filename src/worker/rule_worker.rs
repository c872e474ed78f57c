use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info_span;
use tracing::trace;
use tracing::warn;
use tracing::Instrument;

use super::WorkReceiver;
use crate::constants::METADATA_SOURCE;
use crate::constants::METHOD_WORKER;
use crate::constants::STAGE_AFTER_LOCK;
use crate::constants::STAGE_BEFORE_LOCK;
use crate::processor::ContextProvider;
use crate::processor::RuleTask;
use crate::processor::WorkItem;
use crate::KvStore;
use crate::LockOptions;
use crate::MetricsSink;
use crate::RuleLocker;
use crate::StoreReader;

/// Executes work items. Cheap to clone; every clone shares the same locker
/// and store.
#[derive(Clone)]
pub struct RuleWorker {
    store: Arc<dyn KvStore>,
    locker: Arc<dyn RuleLocker>,
    contexts: Arc<dyn ContextProvider>,
    metrics: Arc<dyn MetricsSink>,
}

impl RuleWorker {
    pub fn new(
        store: Arc<dyn KvStore>,
        locker: Arc<dyn RuleLocker>,
        contexts: Arc<dyn ContextProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            locker,
            contexts,
            metrics,
        }
    }

    pub async fn run(
        &self,
        id: usize,
        receiver: WorkReceiver,
    ) {
        debug!(worker = id, "worker started");
        loop {
            // Hold the receiver only while waiting, so peers can pull work
            // while this worker runs a callback.
            let next = receiver.lock().await.recv().await;
            let Some(item) = next else {
                break;
            };
            self.handle(item).await;
        }
        debug!(worker = id, "worker stopped, work channel closed");
    }

    /// Runs one work item to completion. Never fails: every error is
    /// logged and the item abandoned.
    pub async fn handle(
        &self,
        item: WorkItem,
    ) {
        trace!(rule_id = %item.rule_id, waited = ?item.queued_at.elapsed(), "work item received");
        let context = self.contexts.new_context();
        self.process(&item, &context).await;
        context.cancel();
    }

    async fn process(
        &self,
        item: &WorkItem,
        context: &CancellationToken,
    ) {
        let reader = StoreReader::new(self.store.clone(), context.clone());

        match item.rule.satisfied(&reader).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(rule_id = %item.rule_id, rule = %item.rule, "no longer satisfied before lock");
                self.metrics.satisfied_then_not(&item.rule_id, STAGE_BEFORE_LOCK);
                return;
            }
            Err(e) => {
                warn!(rule_id = %item.rule_id, "satisfaction check failed before lock: {:?}", e);
                return;
            }
        }

        let options = LockOptions::new(item.lock_ttl, METHOD_WORKER, item.lock_pattern.clone());
        let lock = match self.locker.lock(&item.lock_key, &options).await {
            Ok(lock) => lock,
            Err(e) => {
                debug!(rule_id = %item.rule_id, lock_key = %item.lock_key, "lock not acquired: {}", e);
                return;
            }
        };

        match item.rule.satisfied(&reader).await {
            Ok(true) => self.invoke(item, context.clone()).await,
            Ok(false) => {
                debug!(rule_id = %item.rule_id, rule = %item.rule, "no longer satisfied after lock");
                self.metrics.satisfied_then_not(&item.rule_id, STAGE_AFTER_LOCK);
            }
            Err(e) => warn!(rule_id = %item.rule_id, "satisfaction check failed after lock: {:?}", e),
        }

        if let Err(e) = lock.unlock().await {
            warn!(rule_id = %item.rule_id, lock_key = %item.lock_key, "unlock failed: {:?}", e);
        }
    }

    async fn invoke(
        &self,
        item: &WorkItem,
        context: CancellationToken,
    ) {
        let source = item.metadata.get(METADATA_SOURCE).map(String::as_str).unwrap_or("");
        let span = info_span!("rule_task", rule_id = %item.rule_id, source = %source);
        let task = RuleTask {
            rule_id: item.rule_id.clone(),
            attributes: item.attributes.clone(),
            metadata: item.metadata.clone(),
            cancel: context,
            span: span.clone(),
        };

        let started = Instant::now();
        // a panicking callback must not skip the unlock or kill the worker
        let result = AssertUnwindSafe(item.callback.call(task).instrument(span))
            .catch_unwind()
            .await;
        self.metrics.callback_duration(&item.rule_id, started.elapsed());
        match result {
            Ok(Ok(())) => debug!(rule_id = %item.rule_id, lock_key = %item.lock_key, "callback completed"),
            Ok(Err(e)) => warn!(rule_id = %item.rule_id, lock_key = %item.lock_key, "callback failed: {}", e),
            Err(panic) => error!(
                rule_id = %item.rule_id,
                lock_key = %item.lock_key,
                "callback panicked: {}",
                panic_message(panic.as_ref())
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
