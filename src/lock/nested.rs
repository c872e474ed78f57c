use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::LockOptions;
use super::RuleLock;
use super::RuleLocker;
use crate::LockError;

/// Gates an expensive `nested` locker behind a cheap `own` locker.
///
/// `own` is always acquired first and released last. If `own` fails the
/// nested locker is never asked; if the nested locker fails `own` is
/// released before the error is returned.
pub struct NestedLocker {
    own: Arc<dyn RuleLocker>,
    nested: Arc<dyn RuleLocker>,
}

impl NestedLocker {
    pub fn new(
        own: Arc<dyn RuleLocker>,
        nested: Arc<dyn RuleLocker>,
    ) -> Self {
        Self { own, nested }
    }
}

#[async_trait]
impl RuleLocker for NestedLocker {
    async fn lock(
        &self,
        key: &str,
        options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        let own = self.own.lock(key, options).await?;
        match self.nested.lock(key, options).await {
            Ok(nested) => Ok(Box::new(NestedLock { own, nested })),
            Err(e) => {
                if let Err(unlock_err) = own.unlock().await {
                    warn!(%key, "failed to release own lock after nested lock failure: {:?}", unlock_err);
                }
                Err(e)
            }
        }
    }
}

struct NestedLock {
    own: Box<dyn RuleLock>,
    nested: Box<dyn RuleLock>,
}

#[async_trait]
impl RuleLock for NestedLock {
    async fn unlock(&self) -> Result<(), LockError> {
        let nested = self.nested.unlock().await;
        let own = self.own.unlock().await;
        match (nested, own) {
            (Err(nested_err), own) => {
                if let Err(own_err) = own {
                    warn!("own unlock also failed: {:?}", own_err);
                }
                Err(nested_err)
            }
            (Ok(()), own) => own,
        }
    }
}
