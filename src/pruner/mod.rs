//! Collection of orphaned lock keys.
//!
//! A lock key whose creation revision has not changed for longer than the
//! configured timeout is presumed abandoned and removed with a
//! compare-and-delete on that creation revision. The compare makes the
//! delete a no-op if the lock was released and re-acquired in between.


use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::Compare;
use crate::KvStore;
use crate::MetricsSink;
use crate::Revision;
use crate::TxnOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    create_revision: Revision,
    first_seen: Instant,
}

/// Outcome of one pass over one prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Keys listed
    pub seen: usize,
    /// Keys deleted by this pass
    pub pruned: Vec<String>,
    /// Expired keys already changed by someone else
    pub raced: usize,
    /// Tracked keys no longer present, dropped without a delete
    pub forgotten: usize,
}

pub struct LockPruner {
    store: Arc<dyn KvStore>,
    prefixes: Vec<String>,
    timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl LockPruner {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefixes: Vec<String>,
        timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            prefixes,
            timeout,
            metrics,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked
    pub fn tracked_len(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Prunes every prefix on `interval` until `shutdown` fires.
    pub async fn run(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        info!(prefixes = ?self.prefixes, ?interval, timeout = ?self.timeout, "lock pruner started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.prune_all().await,
            }
        }
        info!("lock pruner stopped");
    }

    pub async fn prune_all(&self) {
        for prefix in &self.prefixes {
            match self.prune_prefix(prefix).await {
                Ok(report) if !report.pruned.is_empty() => {
                    info!(%prefix, pruned = ?report.pruned, "orphaned locks removed")
                }
                Ok(_) => {}
                Err(e) => warn!(%prefix, "listing lock keys failed: {:?}", e),
            }
        }
    }

    /// One pass over `prefix`.
    pub async fn prune_prefix(
        &self,
        prefix: &str,
    ) -> crate::Result<PruneReport> {
        let listed = self.store.get_prefix(prefix).await?;
        let now = Instant::now();
        let mut report = PruneReport {
            seen: listed.len(),
            ..Default::default()
        };
        let present: HashSet<&str> = listed.iter().map(|kv| kv.key.as_str()).collect();

        // stale bookkeeping
        {
            let mut tracked = self.tracked.lock();
            let before = tracked.len();
            tracked.retain(|key, _| !key.starts_with(prefix) || present.contains(key.as_str()));
            report.forgotten = before - tracked.len();
        }

        for kv in &listed {
            let expired = {
                let mut tracked = self.tracked.lock();
                match tracked.get(&kv.key) {
                    Some(t) if t.create_revision == kv.create_revision => now.duration_since(t.first_seen) >= self.timeout,
                    _ => {
                        tracked.insert(
                            kv.key.clone(),
                            Tracked {
                                create_revision: kv.create_revision,
                                first_seen: now,
                            },
                        );
                        false
                    }
                }
            };
            if !expired {
                continue;
            }

            let deleted = self
                .store
                .txn(
                    vec![Compare::CreateRevision {
                        key: kv.key.clone(),
                        revision: kv.create_revision,
                    }],
                    vec![TxnOp::Delete { key: kv.key.clone() }],
                )
                .await;
            match deleted {
                Ok(true) => {
                    warn!(key = %kv.key, create_revision = kv.create_revision, "pruned orphaned lock");
                    self.metrics.lock_pruned(prefix);
                    report.pruned.push(kv.key.clone());
                    if let Some(lease) = kv.lease {
                        // session leases are shared by all locks of one process
                        let shared = listed.iter().any(|other| {
                            other.lease == Some(lease) && !report.pruned.iter().any(|pruned| *pruned == other.key)
                        });
                        if shared {
                            debug!(key = %kv.key, lease, "lease still backs other locks, not revoked");
                        } else if let Err(e) = self.store.lease_revoke(lease).await {
                            debug!(key = %kv.key, lease, "lease revoke after prune failed: {:?}", e);
                        }
                    }
                    self.tracked.lock().remove(&kv.key);
                }
                Ok(false) => {
                    debug!(key = %kv.key, "lock changed before prune");
                    report.raced += 1;
                    self.tracked.lock().remove(&kv.key);
                }
                Err(e) => {
                    // kept as is, retried next pass
                    warn!(key = %kv.key, "prune transaction failed: {:?}", e);
                }
            }
        }
        Ok(report)
    }
}
