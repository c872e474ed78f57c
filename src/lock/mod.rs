//! Composable lockers.
//!
//! | Locker | Semantics |
//! |---|---|
//! | [`MapLocker`] | in-process, non-blocking try-lock |
//! | [`StoreLocker`] | store-backed mutex, one session (lease) per lock |
//! | [`SharedSessionLocker`] | store-backed mutex on a supervised long-lived session |
//! | [`NestedLocker`] | cheap `own` lock gating an expensive `nested` lock |
//! | [`CoolOffLocker`] | rate limiter rejecting repeated attempts on a key |
//! | [`MetricsLocker`] | records attempts and release failures of any locker |
//!
//! Every successful [`RuleLocker::lock`] must be paired with exactly one
//! [`RuleLock::unlock`].

mod cool_off;
mod map;
mod metered;
mod nested;
mod session;
mod store_locker;
mod store_mutex;

#[cfg(test)]
mod nested_test;

use std::time::Duration;

use async_trait::async_trait;
pub use cool_off::*;
pub use map::*;
pub use metered::*;
#[cfg(test)]
use mockall::automock;
pub use nested::*;
pub use session::*;
pub use store_locker::*;
pub(crate) use store_mutex::*;

use crate::LockError;

/// Call-scoped lock parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Lease TTL of the lock; bounds how long a crashed holder blocks others
    pub ttl: Duration,
    /// Caller label, e.g. "worker" or "crawler"
    pub method: &'static str,
    /// Unresolved lock-key pattern, used as a low-cardinality metric label
    pub pattern: String,
}

impl LockOptions {
    pub fn new(
        ttl: Duration,
        method: &'static str,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            ttl,
            method,
            pattern: pattern.into(),
        }
    }
}

/// An acquired lock.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuleLock: Send + Sync {
    async fn unlock(&self) -> Result<(), LockError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuleLocker: Send + Sync + 'static {
    async fn lock(
        &self,
        key: &str,
        options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError>;
}

/// Lock handle with nothing to release.
#[derive(Debug, Default)]
pub struct NoopLock;

#[async_trait]
impl RuleLock for NoopLock {
    async fn unlock(&self) -> Result<(), LockError> {
        Ok(())
    }
}
