//! Metrics sinks.
//!
//! Components never touch a process-wide registry: a [`MetricsSink`] is
//! handed to each of them at construction. [`PrometheusMetrics`] owns its own
//! [`Registry`] which the embedding application can expose however it likes.

use std::collections::HashMap;
use std::time::Duration;

use prometheus::exponential_buckets;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


/// Observation hooks. Every method defaults to a no-op.
pub trait MetricsSink: Send + Sync + 'static {
    /// A static rule was checked for satisfaction
    fn rule_evaluated(
        &self,
        _rule_id: &str,
        _source: &str,
    ) {
    }

    /// Per-rule evaluation counts of one finished crawl cycle
    fn crawler_cycle(
        &self,
        _evaluations: &HashMap<String, u64>,
        _elapsed: Duration,
    ) {
    }

    /// Rule was satisfied when queued but no longer when a worker checked
    fn satisfied_then_not(
        &self,
        _rule_id: &str,
        _stage: &str,
    ) {
    }

    /// Time a producer blocked pushing onto the full work channel
    fn work_buffer_wait(
        &self,
        _rule_id: &str,
        _waited: Duration,
    ) {
    }

    fn lock_attempt(
        &self,
        _locker: &str,
        _method: &str,
        _pattern: &str,
        _success: bool,
    ) {
    }

    fn unlock_error(
        &self,
        _locker: &str,
        _method: &str,
        _pattern: &str,
    ) {
    }

    fn callback_duration(
        &self,
        _rule_id: &str,
        _elapsed: Duration,
    ) {
    }

    fn watch_event(
        &self,
        _prefix: &str,
    ) {
    }

    fn lock_pruned(
        &self,
        _prefix: &str,
    ) {
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Prometheus-backed sink with a private registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    rule_evaluations: IntCounterVec,
    crawler_evaluations: IntCounterVec,
    crawler_cycle_seconds: Histogram,
    satisfied_then_not: IntCounterVec,
    work_buffer_wait_ms: HistogramVec,
    lock_attempts: IntCounterVec,
    unlock_errors: IntCounterVec,
    callback_seconds: HistogramVec,
    watch_events: IntCounterVec,
    locks_pruned: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new(namespace: &str) -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;

        let rule_evaluations = IntCounterVec::new(
            Opts::new("rule_evaluations", "Static rule satisfaction checks"),
            &["rule", "source"],
        )?;
        let crawler_evaluations = IntCounterVec::new(
            Opts::new("crawler_rule_evaluations", "Rule evaluations per crawl cycle"),
            &["rule"],
        )?;
        let crawler_cycle_seconds = Histogram::with_opts(
            HistogramOpts::new("crawler_cycle_seconds", "Crawl cycle duration in seconds")
                .buckets(exponential_buckets(0.01, 4.0, 10)?),
        )?;
        let satisfied_then_not = IntCounterVec::new(
            Opts::new("rule_satisfied_then_not", "Rules satisfied when queued but not when re-checked"),
            &["rule", "stage"],
        )?;
        let work_buffer_wait_ms = HistogramVec::new(
            HistogramOpts::new("work_buffer_wait_ms", "Time blocked pushing work items in ms")
                .buckets(exponential_buckets(1.0, 2.0, 15)?),
            &["rule"],
        )?;
        let lock_attempts = IntCounterVec::new(
            Opts::new("lock_attempts", "Lock attempts by locker and outcome"),
            &["locker", "method", "pattern", "success"],
        )?;
        let unlock_errors = IntCounterVec::new(
            Opts::new("unlock_errors", "Failed lock releases"),
            &["locker", "method", "pattern"],
        )?;
        let callback_seconds = HistogramVec::new(
            HistogramOpts::new("callback_seconds", "Rule callback duration in seconds")
                .buckets(exponential_buckets(0.001, 4.0, 10)?),
            &["rule"],
        )?;
        let watch_events = IntCounterVec::new(
            Opts::new("watch_events", "Watch events received"),
            &["prefix"],
        )?;
        let locks_pruned = IntCounterVec::new(
            Opts::new("locks_pruned", "Orphaned locks removed by the pruner"),
            &["prefix"],
        )?;

        registry.register(Box::new(rule_evaluations.clone()))?;
        registry.register(Box::new(crawler_evaluations.clone()))?;
        registry.register(Box::new(crawler_cycle_seconds.clone()))?;
        registry.register(Box::new(satisfied_then_not.clone()))?;
        registry.register(Box::new(work_buffer_wait_ms.clone()))?;
        registry.register(Box::new(lock_attempts.clone()))?;
        registry.register(Box::new(unlock_errors.clone()))?;
        registry.register(Box::new(callback_seconds.clone()))?;
        registry.register(Box::new(watch_events.clone()))?;
        registry.register(Box::new(locks_pruned.clone()))?;

        Ok(Self {
            registry,
            rule_evaluations,
            crawler_evaluations,
            crawler_cycle_seconds,
            satisfied_then_not,
            work_buffer_wait_ms,
            lock_attempts,
            unlock_errors,
            callback_seconds,
            watch_events,
            locks_pruned,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather_text(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!("could not encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn rule_evaluated(
        &self,
        rule_id: &str,
        source: &str,
    ) {
        self.rule_evaluations.with_label_values(&[rule_id, source]).inc();
    }

    fn crawler_cycle(
        &self,
        evaluations: &HashMap<String, u64>,
        elapsed: Duration,
    ) {
        for (rule, count) in evaluations {
            self.crawler_evaluations
                .with_label_values(&[rule.as_str()])
                .inc_by(*count);
        }
        self.crawler_cycle_seconds.observe(elapsed.as_secs_f64());
    }

    fn satisfied_then_not(
        &self,
        rule_id: &str,
        stage: &str,
    ) {
        self.satisfied_then_not.with_label_values(&[rule_id, stage]).inc();
    }

    fn work_buffer_wait(
        &self,
        rule_id: &str,
        waited: Duration,
    ) {
        self.work_buffer_wait_ms
            .with_label_values(&[rule_id])
            .observe(waited.as_secs_f64() * 1000.0);
    }

    fn lock_attempt(
        &self,
        locker: &str,
        method: &str,
        pattern: &str,
        success: bool,
    ) {
        let success = if success { "true" } else { "false" };
        self.lock_attempts
            .with_label_values(&[locker, method, pattern, success])
            .inc();
    }

    fn unlock_error(
        &self,
        locker: &str,
        method: &str,
        pattern: &str,
    ) {
        self.unlock_errors.with_label_values(&[locker, method, pattern]).inc();
    }

    fn callback_duration(
        &self,
        rule_id: &str,
        elapsed: Duration,
    ) {
        self.callback_seconds
            .with_label_values(&[rule_id])
            .observe(elapsed.as_secs_f64());
    }

    fn watch_event(
        &self,
        prefix: &str,
    ) {
        self.watch_events.with_label_values(&[prefix]).inc();
    }

    fn lock_pruned(
        &self,
        prefix: &str,
    ) {
        self.locks_pruned.with_label_values(&[prefix]).inc();
    }
}
