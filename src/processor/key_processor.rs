use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Metadata;
use super::RuleRegistration;
use super::WorkItem;
use crate::constants::METADATA_SOURCE;
use crate::Error;
use crate::MatchedRule;
use crate::MetricsSink;
use crate::ReadApi;
use crate::Result;
use crate::RuleManager;

/// Result of processing one key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Ids of the rules whose satisfaction was checked, one entry per check
    pub evaluated: Vec<String>,
    /// Number of work items queued
    pub dispatched: usize,
}

/// Matches observed keys against the registered rules and queues work for
/// the satisfied ones.
#[derive(Clone)]
pub struct KeyProcessor {
    rules: Arc<RuleManager>,
    registrations: Arc<Vec<RuleRegistration>>,
    sender: mpsc::Sender<WorkItem>,
    metrics: Arc<dyn MetricsSink>,
    lock_key_prefix: String,
}

impl KeyProcessor {
    pub fn new(
        rules: Arc<RuleManager>,
        registrations: Arc<Vec<RuleRegistration>>,
        sender: mpsc::Sender<WorkItem>,
        metrics: Arc<dyn MetricsSink>,
        lock_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            registrations,
            sender,
            metrics,
            lock_key_prefix: lock_key_prefix.into(),
        }
    }

    pub fn rules(&self) -> &RuleManager {
        &self.rules
    }

    /// Checks every rule triggered by `key` and queues the satisfied ones.
    ///
    /// Read failures skip the affected rule; only a closed work channel is
    /// reported as an error.
    pub async fn process_key(
        &self,
        key: &str,
        value: Option<&str>,
        reader: &dyn ReadApi,
        metadata: &Metadata,
    ) -> Result<ProcessOutcome> {
        let source = metadata.get(METADATA_SOURCE).map(String::as_str).unwrap_or("");
        let mut outcome = ProcessOutcome::default();

        for matched in self.rules.get_static_rules(key, value) {
            let Some(registration) = self.registrations.get(matched.index) else {
                warn!(index = matched.index, "rule has no registration");
                continue;
            };
            self.metrics.rule_evaluated(&registration.rule_id, source);
            outcome.evaluated.push(registration.rule_id.clone());

            match matched.rule.satisfied(reader).await {
                Ok(true) => {
                    self.dispatch(matched, registration, metadata).await?;
                    outcome.dispatched += 1;
                }
                Ok(false) => trace!(%key, rule_id = %registration.rule_id, "rule not satisfied"),
                Err(e) => warn!(%key, rule_id = %registration.rule_id, "satisfaction check failed: {:?}", e),
            }
        }
        Ok(outcome)
    }

    /// Whether any rule triggered by `key` is currently satisfied. Queues
    /// nothing.
    pub async fn is_work(
        &self,
        key: &str,
        value: Option<&str>,
        reader: &dyn ReadApi,
    ) -> bool {
        for matched in self.rules.get_static_rules(key, value) {
            match matched.rule.satisfied(reader).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!(%key, "satisfaction check failed: {:?}", e),
            }
        }
        false
    }

    async fn dispatch(
        &self,
        matched: MatchedRule,
        registration: &RuleRegistration,
        metadata: &Metadata,
    ) -> Result<()> {
        let lock_key = format!(
            "{}{}",
            self.lock_key_prefix,
            registration.lock_pattern.format(&matched.attributes)
        );
        let item = WorkItem {
            rule_index: matched.index,
            rule_id: registration.rule_id.clone(),
            rule: matched.rule,
            attributes: matched.attributes,
            lock_key,
            lock_pattern: registration.lock_pattern.template().to_string(),
            lock_ttl: registration.lock_ttl,
            callback: registration.callback.clone(),
            metadata: metadata.clone(),
            queued_at: Instant::now(),
        };
        debug!(rule_id = %item.rule_id, lock_key = %item.lock_key, "queueing work");

        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                let rule_id = item.rule_id.clone();
                let started = Instant::now();
                self.sender.send(item).await.map_err(|_| Error::InvalidState("stopped"))?;
                self.metrics.work_buffer_wait(&rule_id, started.elapsed());
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::InvalidState("stopped")),
        }
    }
}

/// Per-rule evaluation counts of one crawl cycle.
pub(crate) fn count_evaluations(
    counts: &mut HashMap<String, u64>,
    outcome: &ProcessOutcome,
) {
    for rule_id in &outcome.evaluated {
        *counts.entry(rule_id.clone()).or_default() += 1;
    }
}
