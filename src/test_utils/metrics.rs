use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::MetricsSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAttempt {
    pub locker: String,
    pub method: String,
    pub pattern: String,
    pub success: bool,
}

/// Sink that keeps every observation in memory.
#[derive(Default)]
pub struct RecordingMetrics {
    pub evaluations: Mutex<Vec<(String, String)>>,
    pub cycles: Mutex<Vec<HashMap<String, u64>>>,
    pub satisfied_then_not: Mutex<Vec<(String, String)>>,
    pub buffer_waits: Mutex<Vec<String>>,
    pub lock_attempts: Mutex<Vec<LockAttempt>>,
    pub unlock_errors: Mutex<Vec<String>>,
    pub callbacks: Mutex<Vec<String>>,
    pub watch_events: Mutex<Vec<String>>,
    pub pruned: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    pub fn evaluation_count(
        &self,
        rule_id: &str,
    ) -> usize {
        self.evaluations.lock().iter().filter(|(id, _)| id == rule_id).count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn rule_evaluated(
        &self,
        rule_id: &str,
        source: &str,
    ) {
        self.evaluations.lock().push((rule_id.to_string(), source.to_string()));
    }

    fn crawler_cycle(
        &self,
        evaluations: &HashMap<String, u64>,
        _elapsed: Duration,
    ) {
        self.cycles.lock().push(evaluations.clone());
    }

    fn satisfied_then_not(
        &self,
        rule_id: &str,
        stage: &str,
    ) {
        self.satisfied_then_not
            .lock()
            .push((rule_id.to_string(), stage.to_string()));
    }

    fn work_buffer_wait(
        &self,
        rule_id: &str,
        _waited: Duration,
    ) {
        self.buffer_waits.lock().push(rule_id.to_string());
    }

    fn lock_attempt(
        &self,
        locker: &str,
        method: &str,
        pattern: &str,
        success: bool,
    ) {
        self.lock_attempts.lock().push(LockAttempt {
            locker: locker.to_string(),
            method: method.to_string(),
            pattern: pattern.to_string(),
            success,
        });
    }

    fn unlock_error(
        &self,
        locker: &str,
        _method: &str,
        _pattern: &str,
    ) {
        self.unlock_errors.lock().push(locker.to_string());
    }

    fn callback_duration(
        &self,
        rule_id: &str,
        _elapsed: Duration,
    ) {
        self.callbacks.lock().push(rule_id.to_string());
    }

    fn watch_event(
        &self,
        prefix: &str,
    ) {
        self.watch_events.lock().push(prefix.to_string());
    }

    fn lock_pruned(
        &self,
        prefix: &str,
    ) {
        self.pruned.lock().push(prefix.to_string());
    }
}
