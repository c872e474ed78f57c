use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::KvStore;
use crate::LeaseId;
use crate::LockError;

/// A lease kept alive in the background.
///
/// The session is done once it is closed, dropped, or a keep-alive fails
/// (for example because the server lost the lease).
pub struct Session {
    store: Arc<dyn KvStore>,
    lease: LeaseId,
    ttl: Duration,
    done: CancellationToken,
}

impl Session {
    pub async fn new(
        store: Arc<dyn KvStore>,
        ttl: Duration,
    ) -> Result<Arc<Self>, LockError> {
        let lease = store.lease_grant(ttl).await?;
        let done = CancellationToken::new();
        tokio::spawn(Self::keep_alive(store.clone(), lease, ttl, done.clone()));
        debug!(lease, ?ttl, "session created");
        Ok(Arc::new(Self { store, lease, ttl, done }))
    }

    async fn keep_alive(
        store: Arc<dyn KvStore>,
        lease: LeaseId,
        ttl: Duration,
        done: CancellationToken,
    ) {
        let period = (ttl / 3).max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = done.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = store.lease_keep_alive(lease).await {
                        warn!(lease, "session keep-alive failed: {:?}", e);
                        done.cancel();
                        return;
                    }
                }
            }
        }
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_alive(&self) -> bool {
        !self.done.is_cancelled()
    }

    /// Resolves once the session is no longer usable.
    pub async fn done(&self) {
        self.done.cancelled().await
    }

    /// Stops the keep-alive and revokes the lease, releasing every key
    /// attached to it.
    pub async fn close(&self) -> Result<(), LockError> {
        self.done.cancel();
        self.store.lease_revoke(self.lease).await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[derive(Default)]
struct SessionState {
    session: Option<Arc<Session>>,
    last_error: Option<LockError>,
}

/// Supervises one long-lived shared session.
///
/// When the current session dies a replacement is created, retrying with a
/// fixed delay until it succeeds. Callers asking for the session during the
/// gap get the error of the last failed attempt instead of blocking.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    retry_delay: Duration,
    state: Mutex<SessionState>,
    changed: Notify,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Spawns the supervisor. It runs until `shutdown` fires, then closes
    /// the current session.
    pub fn start(
        store: Arc<dyn KvStore>,
        ttl: Duration,
        retry_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let inner = Arc::new(SessionManagerInner {
            store,
            ttl,
            retry_delay,
            state: Mutex::new(SessionState::default()),
            changed: Notify::new(),
            shutdown,
        });
        tokio::spawn(Self::supervise(inner.clone()));
        Self { inner }
    }

    async fn supervise(inner: Arc<SessionManagerInner>) {
        loop {
            let session = match Self::establish(&inner).await {
                Some(session) => session,
                None => return,
            };
            {
                let mut state = inner.state.lock();
                state.session = Some(session.clone());
                state.last_error = None;
            }
            inner.changed.notify_waiters();
            info!(lease = session.lease(), "shared session established");

            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    inner.state.lock().session = None;
                    if let Err(e) = session.close().await {
                        warn!("failed to close shared session: {:?}", e);
                    }
                    return;
                }
                _ = session.done() => {
                    warn!(lease = session.lease(), "shared session lost, replacing");
                    let mut state = inner.state.lock();
                    state.session = None;
                    state.last_error = Some(LockError::Session(format!("session {} expired", session.lease())));
                }
            }
            inner.changed.notify_waiters();
        }
    }

    /// Retries until a session is created or shutdown is requested.
    async fn establish(inner: &SessionManagerInner) -> Option<Arc<Session>> {
        loop {
            if inner.shutdown.is_cancelled() {
                return None;
            }
            match Session::new(inner.store.clone(), inner.ttl).await {
                Ok(session) => return Some(session),
                Err(e) => {
                    warn!("failed to create shared session: {:?}", e);
                    inner.state.lock().last_error = Some(e);
                    inner.changed.notify_waiters();
                }
            }
            tokio::select! {
                _ = inner.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(inner.retry_delay) => {}
            }
        }
    }

    /// The current live session, or the error of the last failed attempt.
    pub fn get_session(&self) -> Result<Arc<Session>, LockError> {
        let state = self.inner.state.lock();
        match &state.session {
            Some(session) if session.is_alive() => Ok(session.clone()),
            _ => Err(state
                .last_error
                .clone()
                .unwrap_or_else(|| LockError::Session("session not established".to_string()))),
        }
    }

    /// Waits up to `wait` for a live session.
    pub async fn wait_for_session(
        &self,
        wait: Duration,
    ) -> Result<Arc<Session>, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            let changed = self.inner.changed.notified();
            if let Ok(session) = self.get_session() {
                return Ok(session);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.get_session();
            }
        }
    }
}
