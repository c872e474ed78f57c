//! Dispatch of triggered rules.
//!
//! The [`KeyProcessor`] turns an observed `(key, value)` into [`WorkItem`]s
//! on the bounded work channel; workers turn them into [`RuleTask`]s handed
//! to the registered [`RuleCallback`].

mod key_processor;


use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use key_processor::*;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::Attributes;
use crate::Pattern;
use crate::StaticRule;

/// Free-form labels attached to a work item, e.g. `{"source": "crawler"}`.
pub type Metadata = HashMap<String, String>;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// User code run when a rule is satisfied under its lock.
#[async_trait]
pub trait RuleCallback: Send + Sync + 'static {
    async fn call(
        &self,
        task: RuleTask,
    ) -> Result<(), CallbackError>;
}

struct FnCallback<F>(F);

#[async_trait]
impl<F, Fut> RuleCallback for FnCallback<F>
where
    F: Fn(RuleTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    async fn call(
        &self,
        task: RuleTask,
    ) -> Result<(), CallbackError> {
        (self.0)(task).await
    }
}

/// Wraps an async closure as a [`RuleCallback`].
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn RuleCallback>
where
    F: Fn(RuleTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(FnCallback(f))
}

/// Supplies the cancellation context of each rule task.
pub trait ContextProvider: Send + Sync + 'static {
    fn new_context(&self) -> CancellationToken;
}

/// Hands out children of one parent token, so cancelling the parent
/// cancels every outstanding task.
#[derive(Debug, Clone)]
pub struct ChildContextProvider {
    parent: CancellationToken,
}

impl ChildContextProvider {
    pub fn new(parent: CancellationToken) -> Self {
        Self { parent }
    }
}

impl ContextProvider for ChildContextProvider {
    fn new_context(&self) -> CancellationToken {
        self.parent.child_token()
    }
}

/// Everything the pipeline needs to know about one registered rule.
#[derive(Clone)]
pub struct RuleRegistration {
    pub rule_id: String,
    pub lock_pattern: Pattern,
    pub lock_ttl: Duration,
    pub callback: Arc<dyn RuleCallback>,
}

/// A satisfied static rule waiting for a worker.
#[derive(Clone)]
pub struct WorkItem {
    pub rule_index: usize,
    pub rule_id: String,
    pub rule: StaticRule,
    pub attributes: Attributes,
    /// Fully resolved lock key
    pub lock_key: String,
    /// Unresolved lock-key template, used as a metric label
    pub lock_pattern: String,
    pub lock_ttl: Duration,
    pub callback: Arc<dyn RuleCallback>,
    pub metadata: Metadata,
    pub queued_at: Instant,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("rule_id", &self.rule_id)
            .field("rule", &self.rule)
            .field("lock_key", &self.lock_key)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Handed to a [`RuleCallback`].
#[derive(Debug, Clone)]
pub struct RuleTask {
    pub rule_id: String,
    pub attributes: Attributes,
    pub metadata: Metadata,
    /// Cancelled on engine shutdown and once the callback returns
    pub cancel: CancellationToken,
    /// Span tagged with the rule id and trigger source
    pub span: Span,
}

impl RuleTask {
    pub fn attribute(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.attributes.get(name)
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(crate::constants::METADATA_SOURCE).map(String::as_str)
    }
}
