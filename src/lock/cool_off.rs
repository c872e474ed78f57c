use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::LockOptions;
use super::NoopLock;
use super::RuleLock;
use super::RuleLocker;
use crate::LockError;

/// Rate limiter shaped like a locker.
///
/// An attempt on a key fails if any earlier attempt on the same key, failed
/// or not, happened within the cool-off window. Every attempt restarts the
/// window. This gives no mutual exclusion on its own and belongs in front of
/// a real locker.
pub struct CoolOffLocker {
    window: Duration,
    attempts: Mutex<HashMap<String, Instant>>,
}

impl CoolOffLocker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempt(
        &self,
        key: &str,
    ) -> Result<(), LockError> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let previous = attempts.insert(key.to_string(), now);
        // forget keys whose window passed
        let window = self.window;
        attempts.retain(|k, at| k == key || now.duration_since(*at) < window);

        match previous {
            Some(at) if now.duration_since(at) < self.window => Err(LockError::CoolOff { key: key.to_string() }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RuleLocker for CoolOffLocker {
    async fn lock(
        &self,
        key: &str,
        _options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        self.attempt(key)?;
        Ok(Box::new(NoopLock))
    }
}
