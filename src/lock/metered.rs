use std::sync::Arc;

use async_trait::async_trait;

use super::LockOptions;
use super::RuleLock;
use super::RuleLocker;
use crate::LockError;
use crate::MetricsSink;

/// Records lock attempts and release failures without changing semantics.
pub struct MetricsLocker {
    name: &'static str,
    inner: Arc<dyn RuleLocker>,
    metrics: Arc<dyn MetricsSink>,
}

impl MetricsLocker {
    pub fn new(
        name: &'static str,
        inner: Arc<dyn RuleLocker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { name, inner, metrics }
    }
}

#[async_trait]
impl RuleLocker for MetricsLocker {
    async fn lock(
        &self,
        key: &str,
        options: &LockOptions,
    ) -> Result<Box<dyn RuleLock>, LockError> {
        let result = self.inner.lock(key, options).await;
        self.metrics
            .lock_attempt(self.name, options.method, &options.pattern, result.is_ok());
        let lock = result?;
        Ok(Box::new(MetricsLock {
            name: self.name,
            options: options.clone(),
            inner: lock,
            metrics: self.metrics.clone(),
        }))
    }
}

struct MetricsLock {
    name: &'static str,
    options: LockOptions,
    inner: Box<dyn RuleLock>,
    metrics: Arc<dyn MetricsSink>,
}

#[async_trait]
impl RuleLock for MetricsLock {
    async fn unlock(&self) -> Result<(), LockError> {
        let result = self.inner.unlock().await;
        if result.is_err() {
            self.metrics
                .unlock_error(self.name, self.options.method, &self.options.pattern);
        }
        result
    }
}
