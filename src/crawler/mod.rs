//! Pull-based change detection: periodic full scans of the watched
//! keyspace.

mod jitter;

#[cfg(test)]
mod jitter_test;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use jitter::*;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::METADATA_SOURCE;
use crate::constants::METHOD_CRAWLER;
use crate::constants::SOURCE_CRAWLER;
use crate::processor::count_evaluations;
use crate::processor::KeyProcessor;
use crate::processor::Metadata;
use crate::CrawlerConfig;
use crate::KvStore;
use crate::LockOptions;
use crate::MetricsSink;
use crate::Result;
use crate::RuleLocker;
use crate::SnapshotReader;
use crate::StoreReader;

/// Store lock serializing crawls across engine instances.
#[derive(Clone)]
pub struct CrawlerMutex {
    pub locker: Arc<dyn RuleLocker>,
    pub key: String,
    pub ttl: Duration,
}

/// Summary of one crawl cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Keys in the snapshot
    pub keys: usize,
    /// Keys that passed the snapshot check and were processed
    pub processed: usize,
    pub dispatched: usize,
    /// Per rule id evaluation counts
    pub evaluations: HashMap<String, u64>,
    /// False if stopped or timed out mid-cycle
    pub completed: bool,
}

pub struct Crawler {
    store: Arc<dyn KvStore>,
    processor: KeyProcessor,
    prefixes: Vec<String>,
    config: CrawlerConfig,
    mutex: Option<CrawlerMutex>,
    metrics: Arc<dyn MetricsSink>,
    stopping: CancellationToken,
}

impl Crawler {
    pub fn new(
        store: Arc<dyn KvStore>,
        processor: KeyProcessor,
        prefixes: Vec<String>,
        config: CrawlerConfig,
        mutex: Option<CrawlerMutex>,
        metrics: Arc<dyn MetricsSink>,
        stopping: CancellationToken,
    ) -> Self {
        Self {
            store,
            processor,
            prefixes,
            config,
            mutex,
            metrics,
            stopping,
        }
    }

    /// Signals the crawler to stop at the next key boundary.
    pub fn stop(&self) {
        self.stopping.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Crawls once immediately, then every jittered interval until stopped.
    pub async fn run(&self) {
        info!(prefixes = ?self.prefixes, "crawler started");
        while !self.is_stopping() {
            match self.run_once().await {
                Ok(Some(report)) => debug!(
                    keys = report.keys,
                    processed = report.processed,
                    dispatched = report.dispatched,
                    completed = report.completed,
                    "crawl cycle finished"
                ),
                Ok(None) => {}
                Err(e) => warn!("crawl cycle failed: {}", e),
            }

            let pause = jittered(self.config.interval(), self.config.jitter_percent);
            tokio::select! {
                _ = self.stopping.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("crawler stopped");
    }

    /// One cycle, under the crawler mutex when configured. Returns `None`
    /// when the mutex could not be taken and the cycle was skipped.
    pub async fn run_once(&self) -> Result<Option<CycleReport>> {
        let Some(mutex) = &self.mutex else {
            return self.bounded_run().await.map(Some);
        };

        let options = LockOptions::new(mutex.ttl, METHOD_CRAWLER, mutex.key.clone());
        let lock = match mutex.locker.lock(&mutex.key, &options).await {
            Ok(lock) => lock,
            Err(e) => {
                info!(key = %mutex.key, "crawler mutex not acquired, skipping cycle: {}", e);
                return Ok(None);
            }
        };
        let result = self.bounded_run().await;
        if let Err(e) = lock.unlock().await {
            warn!(key = %mutex.key, "failed to release crawler mutex: {:?}", e);
        }
        result.map(Some)
    }

    async fn bounded_run(&self) -> Result<CycleReport> {
        let cycle = self.stopping.child_token();
        let timeout = self.config.cycle_timeout();
        let run = self.single_run(&cycle);
        tokio::pin!(run);
        tokio::select! {
            report = &mut run => report,
            _ = tokio::time::sleep(timeout) => {
                warn!(?timeout, "crawl cycle timed out");
                cycle.cancel();
                // finishes at the next key boundary with a partial report
                run.await
            }
        }
    }

    /// Lists every prefix, then processes each key whose rules are satisfied
    /// against the snapshot.
    pub async fn single_run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let mut entries = Vec::new();
        for prefix in &self.prefixes {
            for kv in self.store.get_prefix(prefix).await? {
                entries.push((kv.key, kv.value));
            }
        }
        report.keys = entries.len();
        let snapshot = SnapshotReader::new(entries.iter().cloned().collect());
        let reader = StoreReader::new(self.store.clone(), cancel.clone());
        let metadata: Metadata = HashMap::from([(METADATA_SOURCE.to_string(), SOURCE_CRAWLER.to_string())]);
        debug!(keys = report.keys, "crawl snapshot taken");

        report.completed = true;
        for (key, value) in &entries {
            if cancel.is_cancelled() {
                report.completed = false;
                break;
            }
            if !self.processor.is_work(key, Some(value), &snapshot).await {
                continue;
            }
            let outcome = self.processor.process_key(key, Some(value), &reader, &metadata).await?;
            count_evaluations(&mut report.evaluations, &outcome);
            report.processed += 1;
            report.dispatched += outcome.dispatched;

            let delay = jittered(self.config.key_delay(), self.config.key_delay_jitter_percent);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.metrics.crawler_cycle(&report.evaluations, started.elapsed());
        Ok(report)
    }
}
