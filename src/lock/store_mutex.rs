use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::Compare;
use crate::KvStore;
use crate::LeaseId;
use crate::LockError;
use crate::TxnOp;

/// Upper bound between acquisition retries when no watch event arrives,
/// e.g. when the holder's lease expires silently.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A held store-backed mutex.
///
/// The lock key is created with a create-if-absent transaction, bound to a
/// lease and holding a unique owner token. Release is a compare-and-delete
/// on that token, so a lock that was lost and re-acquired by someone else is
/// never deleted by its previous owner.
pub(crate) struct StoreMutex {
    store: Arc<dyn KvStore>,
    key: String,
    owner: String,
}

impl StoreMutex {
    pub(crate) async fn acquire(
        store: Arc<dyn KvStore>,
        key: &str,
        lease: LeaseId,
        wait: Duration,
    ) -> Result<Self, LockError> {
        let deadline = Instant::now() + wait;
        let owner = nanoid::nanoid!();
        let mut changes = store.watch(key).await?;

        loop {
            let created = store
                .txn(
                    vec![Compare::CreateRevision {
                        key: key.to_string(),
                        revision: 0,
                    }],
                    vec![TxnOp::Put {
                        key: key.to_string(),
                        value: owner.clone(),
                        lease: Some(lease),
                    }],
                )
                .await?;
            if created {
                debug!(%key, lease, "store mutex acquired");
                return Ok(Self {
                    store,
                    key: key.to_string(),
                    owner,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: wait,
                });
            }
            match timeout(remaining.min(RETRY_INTERVAL), changes.next()).await {
                Ok(Some(Ok(event))) => trace!(%key, revision = event.revision, "lock key changed"),
                Ok(Some(Err(e))) => {
                    trace!(%key, "lock watch failed: {:?}", e);
                    changes = store.watch(key).await?;
                }
                Ok(None) => changes = store.watch(key).await?,
                Err(_) => {}
            }
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn release(&self) -> Result<(), LockError> {
        let deleted = self
            .store
            .txn(
                vec![Compare::Value {
                    key: self.key.clone(),
                    value: Some(self.owner.clone()),
                }],
                vec![TxnOp::Delete { key: self.key.clone() }],
            )
            .await?;
        if deleted {
            debug!(key = %self.key, "store mutex released");
            Ok(())
        } else {
            Err(LockError::NotHeld { key: self.key.clone() })
        }
    }
}
