use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use super::LockOptions;
use super::RuleLock;
use super::RuleLocker;
use super::Session;
use super::SessionManager;
use super::StoreMutex;
use crate::KvStore;
use crate::LockError;

/// Store-backed locker creating a dedicated session per lock, scoped to the
/// lock's TTL. Unlock releases the mutex and closes the session.
pub struct StoreLocker {
    store: Arc<dyn KvStore>,
    acquire_timeout: Duration,
}

impl StoreLocker {
    pub fn new(
        store: Arc<dyn KvStore>,
        acquire_timeout: Duration,
    ) -> Self {
        Self { store, acquire_timeout }
    }
}

#[async_trait]
impl RuleLocker for StoreLocker {
    async fn lock(
        &self,
        key: &str,
        options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        let session = Session::new(self.store.clone(), options.ttl).await?;
        match StoreMutex::acquire(self.store.clone(), key, session.lease(), self.acquire_timeout).await {
            Ok(mutex) => Ok(Box::new(StoreLock {
                mutex,
                session: Some(session),
            })),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(%key, "failed to close session after lock failure: {:?}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// Store-backed locker reusing the shared session of a [`SessionManager`].
///
/// Locks live as long as the shared session; the per-call TTL does not
/// apply. While the session is being replaced, callers wait for the new one
/// within the acquisition timeout and then get the last session error.
pub struct SharedSessionLocker {
    store: Arc<dyn KvStore>,
    sessions: SessionManager,
    acquire_timeout: Duration,
}

impl SharedSessionLocker {
    pub fn new(
        store: Arc<dyn KvStore>,
        sessions: SessionManager,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            acquire_timeout,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

#[async_trait]
impl RuleLocker for SharedSessionLocker {
    async fn lock(
        &self,
        key: &str,
        _options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        let started = Instant::now();
        let session = self.sessions.wait_for_session(self.acquire_timeout).await?;
        let remaining = self.acquire_timeout.saturating_sub(started.elapsed());
        let mutex = StoreMutex::acquire(self.store.clone(), key, session.lease(), remaining).await?;
        Ok(Box::new(StoreLock { mutex, session: None }))
    }
}

struct StoreLock {
    mutex: StoreMutex,
    /// Owned per-lock session, closed on unlock
    session: Option<Arc<Session>>,
}

#[async_trait]
impl RuleLock for StoreLock {
    async fn unlock(&self) -> Result<(), LockError> {
        let released = self.mutex.release().await;
        if let Some(session) = &self.session {
            if let Err(e) = session.close().await {
                warn!(key = %self.mutex.key(), "failed to close lock session: {:?}", e);
                return released.and(Err(e));
            }
        }
        released
    }
}
