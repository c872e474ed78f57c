//! Engine lifecycle: registration, start and graceful stop.

mod builder;
mod supervisor;

#[cfg(test)]
mod engine_test;

use std::collections::HashSet;
use std::sync::Arc;

use builder::EngineBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::processor::ContextProvider;
use crate::processor::RuleCallback;
use crate::processor::RuleRegistration;
use crate::DynamicRule;
use crate::Error;
use crate::KvStore;
use crate::MetricsSink;
use crate::Pattern;
use crate::Result;
use crate::RuleManager;
use crate::RuleOptions;
use crate::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting rule registrations
    Created,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    fn describe(self) -> &'static str {
        match self {
            EngineState::Created => "not started",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        }
    }
}

/// Background tasks of a started engine.
struct Tasks {
    /// Stops watchers and the crawler
    producers: CancellationToken,
    /// Stops everything else, and cancels in-flight task contexts
    shutdown: CancellationToken,
    producer_handles: Vec<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    pruner_handle: Option<JoinHandle<()>>,
}

/// Rules engine over a [`KvStore`].
///
/// Rules are registered first, then [`start`](Engine::start) spawns one
/// watcher per watched prefix, the crawler, the workers and the lock
/// pruner.
pub struct Engine {
    settings: Settings,
    store: Arc<dyn KvStore>,
    metrics: Arc<dyn MetricsSink>,
    contexts: Option<Arc<dyn ContextProvider>>,
    rules: Arc<RuleManager>,
    registrations: Vec<RuleRegistration>,
    rule_ids: HashSet<String>,
    state: EngineState,
    tasks: Option<Tasks>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        store: Arc<dyn KvStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            settings,
            store,
            metrics,
            contexts: None,
            rules: Arc::new(RuleManager::new()),
            registrations: Vec::new(),
            rule_ids: HashSet::new(),
            state: EngineState::Created,
            tasks: None,
        }
    }

    /// Replaces the default context provider, which hands out children of
    /// the engine's shutdown token.
    pub fn with_context_provider(
        mut self,
        contexts: Arc<dyn ContextProvider>,
    ) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn rules(&self) -> &RuleManager {
        &self.rules
    }

    /// Registers a rule, its lock-key template and callback. Returns the
    /// rule index.
    ///
    /// # Errors
    /// - [`Error::Pattern`] if `lock_pattern` is malformed
    /// - [`Error::DuplicateRuleId`] if `options.rule_id` is already taken
    /// - [`Error::InvalidState`] once the engine has started
    pub fn add_rule(
        &mut self,
        rule: DynamicRule,
        lock_pattern: &str,
        callback: Arc<dyn RuleCallback>,
        options: RuleOptions,
    ) -> Result<usize> {
        if self.state != EngineState::Created {
            return Err(Error::InvalidState(self.state.describe()));
        }
        let lock_pattern = Pattern::new(lock_pattern)?;
        let rule_id = options
            .rule_id
            .clone()
            .unwrap_or_else(|| format!("rule-{}", self.rules.len()));
        if self.rule_ids.contains(&rule_id) {
            return Err(Error::DuplicateRuleId(rule_id));
        }

        let bound = rule.variables();
        let unbound: Vec<&str> = lock_pattern.variables().filter(|v| !bound.contains(*v)).collect();
        if !unbound.is_empty() {
            warn!(%rule_id, lock_pattern = %lock_pattern, ?unbound, "lock pattern uses variables the rule never binds");
        }

        let rules = Arc::get_mut(&mut self.rules).ok_or(Error::InvalidState("running"))?;
        let index = rules.add_rule(rule, &options);
        let lock_ttl = options
            .lock_ttl
            .unwrap_or_else(|| self.settings.engine.default_lock_ttl());
        debug!(index, %rule_id, lock_pattern = %lock_pattern, ?lock_ttl, crawler_only = options.crawler_only, "rule registered");
        self.rule_ids.insert(rule_id.clone());
        self.registrations.push(RuleRegistration {
            rule_id,
            lock_pattern,
            lock_ttl,
            callback,
        });
        Ok(index)
    }

    /// Registers a rule evaluated by the crawler only. Its prefixes are
    /// never watched unless a watched rule shares them.
    pub fn add_polling_rule(
        &mut self,
        rule: DynamicRule,
        lock_pattern: &str,
        callback: Arc<dyn RuleCallback>,
        options: RuleOptions,
    ) -> Result<usize> {
        self.add_rule(rule, lock_pattern, callback, options.crawler_only())
    }

    /// Validates the settings and spawns every background task. Must be
    /// called within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EngineState::Created {
            return Err(Error::InvalidState(self.state.describe()));
        }
        self.settings.clone().validate()?;
        let tasks = EngineBuilder {
            settings: &self.settings,
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            contexts: self.contexts.clone(),
        }
        .spawn(self.rules.clone(), Arc::new(self.registrations.clone()))?;
        self.tasks = Some(tasks);
        self.state = EngineState::Running;
        info!("rules engine started");
        Ok(())
    }

    /// Stops producers, lets workers drain the work channel, then stops the
    /// rest. Waits up to `engine.shutdown_timeout_ms`; tasks still running
    /// after that are aborted and [`Error::ShutdownTimeout`] returned.
    /// A task that panicked is reported as [`Error::TaskFailed`]. Stopping a
    /// stopped engine is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut tasks) = self.tasks.take() else {
            if self.state == EngineState::Created {
                self.state = EngineState::Stopped;
            }
            return Ok(());
        };
        self.state = EngineState::Stopping;
        info!("rules engine stopping");

        let timeout = self.settings.engine.shutdown_timeout();
        tasks.producers.cancel();
        let mut drain: Vec<JoinHandle<()>> = tasks.producer_handles.drain(..).collect();
        drain.append(&mut tasks.worker_handles);
        let mut failure = None;
        let drained = tokio::time::timeout(timeout, async {
            for handle in drain.iter_mut() {
                if let Err(e) = handle.await {
                    error!("engine task failed: {:?}", e);
                    failure.get_or_insert(e);
                }
            }
        })
        .await;

        tasks.shutdown.cancel();
        if let Some(pruner) = tasks.pruner_handle.take() {
            let _ = pruner.await;
        }
        self.state = EngineState::Stopped;

        match drained {
            Ok(()) => match failure {
                Some(e) => Err(Error::TaskFailed(e)),
                None => {
                    info!("rules engine stopped");
                    Ok(())
                }
            },
            Err(_) => {
                for handle in &drain {
                    handle.abort();
                }
                warn!(?timeout, "rules engine shutdown timed out, remaining tasks aborted");
                Err(Error::ShutdownTimeout(timeout))
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(tasks) = &self.tasks {
            tasks.producers.cancel();
            tasks.shutdown.cancel();
        }
    }
}
