use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::trace;

use super::LockOptions;
use super::RuleLock;
use super::RuleLocker;
use crate::LockError;

enum MapRequest {
    Lock {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Unlock {
        key: String,
        reply: oneshot::Sender<bool>,
    },
}

/// In-process try-lock.
///
/// The set of held keys is owned by a single task; lock and unlock are
/// requests sent to it, so the set is never touched concurrently. The task
/// exits once the locker and every outstanding lock are dropped.
#[derive(Clone)]
pub struct MapLocker {
    requests: mpsc::Sender<MapRequest>,
}

impl MapLocker {
    /// Must be called within a Tokio runtime.
    pub fn new() -> Self {
        let (requests, rx) = mpsc::channel(64);
        tokio::spawn(Self::run(rx));
        Self { requests }
    }

    async fn run(mut rx: mpsc::Receiver<MapRequest>) {
        let mut held: HashSet<String> = HashSet::new();
        while let Some(request) = rx.recv().await {
            match request {
                MapRequest::Lock { key, reply } => {
                    let acquired = held.insert(key);
                    let _ = reply.send(acquired);
                }
                MapRequest::Unlock { key, reply } => {
                    let released = held.remove(&key);
                    let _ = reply.send(released);
                }
            }
        }
        trace!("map locker stopped");
    }

    async fn request(
        requests: &mpsc::Sender<MapRequest>,
        build: impl FnOnce(oneshot::Sender<bool>) -> MapRequest,
        key: &str,
    ) -> Result<bool, LockError> {
        let (reply, rx) = oneshot::channel();
        requests
            .send(build(reply))
            .await
            .map_err(|_| LockError::NotHeld { key: key.to_string() })?;
        rx.await.map_err(|_| LockError::NotHeld { key: key.to_string() })
    }
}

impl Default for MapLocker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleLocker for MapLocker {
    async fn lock(
        &self,
        key: &str,
        _options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        let owned = key.to_string();
        let acquired = Self::request(&self.requests, |reply| MapRequest::Lock { key: owned, reply }, key).await?;
        if !acquired {
            return Err(LockError::LockedLocally { key: key.to_string() });
        }
        Ok(Box::new(MapLock {
            key: key.to_string(),
            requests: self.requests.clone(),
        }))
    }
}

struct MapLock {
    key: String,
    requests: mpsc::Sender<MapRequest>,
}

#[async_trait]
impl RuleLock for MapLock {
    async fn unlock(&self) -> Result<(), LockError> {
        let key = self.key.clone();
        let released = MapLocker::request(&self.requests, |reply| MapRequest::Unlock { key, reply }, &self.key).await?;
        if released {
            Ok(())
        } else {
            Err(LockError::NotHeld { key: self.key.clone() })
        }
    }
}
