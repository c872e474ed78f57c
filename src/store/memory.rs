//! In-memory [`KvStore`] backend.
//!
//! All mutations are serialized under a single mutex and stamped with a
//! monotonically increasing revision, so reads are linearizable and watch
//! events are delivered in revision order. Watchers are kept in a `DashMap`
//! keyed by watcher id; a watcher whose receiving stream was dropped is
//! removed on the next event it would have received.
//!
//! Lease expiry is evaluated lazily on every call against `tokio::time`, so
//! tests can drive expiry with a paused clock.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use tracing::trace;

use super::Compare;
use super::KeyValue;
use super::KvStore;
use super::LeaseId;
use super::Revision;
use super::TxnOp;
use super::WatchEvent;
use super::WatchStream;
use crate::StoreError;

type WatchSender = mpsc::UnboundedSender<Result<WatchEvent, StoreError>>;

struct Watcher {
    prefix: String,
    sender: WatchSender,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    revision: Revision,
    data: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: LeaseId,
    unavailable: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    state: Mutex<State>,
    watchers: DashMap<u64, Watcher>,
    next_watcher_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store revision
    pub fn revision(&self) -> Revision {
        self.inner.state.lock().revision
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Terminates every open watch stream with `error`.
    pub fn fail_watches(
        &self,
        error: StoreError,
    ) {
        let _state = self.inner.state.lock();
        for entry in self.inner.watchers.iter() {
            let _ = entry.sender.send(Err(error.clone()));
        }
        self.inner.watchers.clear();
    }

    /// Expires a lease immediately, as if its holder stopped refreshing it.
    pub fn expire_lease(
        &self,
        lease: LeaseId,
    ) {
        let mut state = self.inner.state.lock();
        self.remove_lease(&mut state, lease);
    }

    /// While set, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(
        &self,
        reason: Option<&str>,
    ) {
        self.inner.state.lock().unavailable = reason.map(str::to_string);
    }

    fn check(
        &self,
        state: &mut State,
    ) -> Result<(), StoreError> {
        if let Some(reason) = &state.unavailable {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        let now = Instant::now();
        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            debug!(lease = id, "lease expired");
            self.remove_lease(state, id);
        }
        Ok(())
    }

    fn remove_lease(
        &self,
        state: &mut State,
        lease: LeaseId,
    ) -> bool {
        let Some(removed) = state.leases.remove(&lease) else {
            return false;
        };
        if !removed.keys.is_empty() {
            state.revision += 1;
            let revision = state.revision;
            for key in removed.keys {
                if state.data.remove(&key).is_some() {
                    self.notify(&key, None, revision);
                }
            }
        }
        true
    }

    fn apply_put(
        &self,
        state: &mut State,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
        revision: Revision,
    ) {
        let previous = state.data.get(key).cloned();
        if let Some(old_lease) = previous.as_ref().and_then(|kv| kv.lease) {
            if let Some(l) = state.leases.get_mut(&old_lease) {
                l.keys.remove(key);
            }
        }
        if let Some(id) = lease {
            if let Some(l) = state.leases.get_mut(&id) {
                l.keys.insert(key.to_string());
            }
        }
        let create_revision = previous.map(|kv| kv.create_revision).unwrap_or(revision);
        state.data.insert(
            key.to_string(),
            KeyValue {
                key: key.to_string(),
                value: value.to_string(),
                create_revision,
                mod_revision: revision,
                lease,
            },
        );
        self.notify(key, Some(value.to_string()), revision);
    }

    fn apply_delete(
        &self,
        state: &mut State,
        key: &str,
        revision: Revision,
    ) -> bool {
        match state.data.remove(key) {
            Some(kv) => {
                if let Some(l) = kv.lease.and_then(|id| state.leases.get_mut(&id)) {
                    l.keys.remove(key);
                }
                self.notify(key, None, revision);
                true
            }
            None => false,
        }
    }

    fn ensure_lease(
        state: &State,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        match lease {
            Some(id) if !state.leases.contains_key(&id) => Err(StoreError::LeaseNotFound(id)),
            _ => Ok(()),
        }
    }

    /// Must be called with the state lock held so events stay in order.
    fn notify(
        &self,
        key: &str,
        value: Option<String>,
        revision: Revision,
    ) {
        let event = WatchEvent {
            key: key.to_string(),
            value,
            revision,
        };
        self.inner.watchers.retain(|id, watcher| {
            if !key.starts_with(&watcher.prefix) {
                return true;
            }
            let delivered = watcher.sender.send(Ok(event.clone())).is_ok();
            if !delivered {
                trace!(watcher_id = id, "watch receiver dropped");
            }
            delivered
        });
    }

    fn matches(
        state: &State,
        compare: &Compare,
    ) -> bool {
        match compare {
            Compare::CreateRevision { key, revision } => {
                state.data.get(key).map(|kv| kv.create_revision).unwrap_or(0) == *revision
            }
            Compare::Value { key, value } => state.data.get(key).map(|kv| &kv.value) == value.as_ref(),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<KeyValue>, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        Ok(state.data.get(key).cloned())
    }

    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<KeyValue>, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        Self::ensure_lease(&state, lease)?;
        state.revision += 1;
        let revision = state.revision;
        self.apply_put(&mut state, key, value, lease, revision);
        Ok(revision)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        if !state.data.contains_key(key) {
            return Ok(false);
        }
        state.revision += 1;
        let revision = state.revision;
        Ok(self.apply_delete(&mut state, key, revision))
    }

    async fn txn(
        &self,
        compares: Vec<Compare>,
        success: Vec<TxnOp>,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        if !compares.iter().all(|c| Self::matches(&state, c)) {
            return Ok(false);
        }
        for op in &success {
            if let TxnOp::Put { lease, .. } = op {
                Self::ensure_lease(&state, *lease)?;
            }
        }
        if success.is_empty() {
            return Ok(true);
        }
        state.revision += 1;
        let revision = state.revision;
        for op in success {
            match op {
                TxnOp::Put { key, value, lease } => self.apply_put(&mut state, &key, &value, lease, revision),
                TxnOp::Delete { key } => {
                    self.apply_delete(&mut state, &key, revision);
                }
            }
        }
        Ok(true)
    }

    async fn watch(
        &self,
        prefix: &str,
    ) -> Result<WatchStream, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.insert(
            id,
            Watcher {
                prefix: prefix.to_string(),
                sender,
            },
        );
        debug!(watcher_id = id, %prefix, "watch registered");
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn lease_grant(
        &self,
        ttl: Duration,
    ) -> Result<LeaseId, StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn lease_keep_alive(
        &self,
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        let l = state.leases.get_mut(&lease).ok_or(StoreError::LeaseNotFound(lease))?;
        l.deadline = Instant::now() + l.ttl;
        Ok(())
    }

    async fn lease_revoke(
        &self,
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        self.check(&mut state)?;
        if self.remove_lease(&mut state, lease) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease))
        }
    }
}
