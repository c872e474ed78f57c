use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::Engine;
use super::EngineState;
use crate::constants::SOURCE_CRAWLER;
use crate::constants::SOURCE_WATCHER;
use crate::processor::callback_fn;
use crate::processor::CallbackError;
use crate::processor::RuleCallback;
use crate::processor::RuleTask;
use crate::test_utils::enable_logger;
use crate::test_utils::wait_until;
use crate::test_utils::RecordingMetrics;
use crate::DynamicRule;
use crate::Error;
use crate::KvStore;
use crate::MemoryStore;
use crate::PatternError;
use crate::RuleOptions;
use crate::Settings;
use crate::StoreError;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.engine.concurrency = 2;
    settings.engine.watch_restart_delay_ms = 50;
    settings.engine.shutdown_timeout_ms = 2000;
    settings.crawler.enabled = false;
    settings.pruner.enabled = false;
    settings
}

fn recording_callback() -> (Arc<dyn RuleCallback>, mpsc::UnboundedReceiver<RuleTask>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = callback_fn(move |task: RuleTask| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(task);
            Ok::<(), CallbackError>(())
        }
    });
    (callback, rx)
}

fn done_rule() -> DynamicRule {
    DynamicRule::equals_literal("/jobs/:id/state", Some("done")).unwrap()
}

async fn next_task(rx: &mut mpsc::UnboundedReceiver<RuleTask>) -> RuleTask {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback not invoked in time")
        .expect("callback channel closed")
}

async fn wait_for_watch(store: &MemoryStore) {
    let store = store.clone();
    assert!(wait_until(Duration::from_secs(1), move || store.watcher_count() > 0).await);
}

#[tokio::test]
async fn test_rule_ids_default_and_must_be_unique() {
    let mut engine = Engine::new(settings(), Arc::new(MemoryStore::new()), Arc::new(RecordingMetrics::default()));
    let (callback, _rx) = recording_callback();

    assert_eq!(
        engine.add_rule(done_rule(), "/jobs/:id", callback.clone(), RuleOptions::default()).unwrap(),
        0
    );
    engine
        .add_rule(done_rule(), "/jobs/:id", callback.clone(), RuleOptions::default().with_rule_id("jobs"))
        .unwrap();

    let err = engine
        .add_rule(done_rule(), "/jobs/:id", callback.clone(), RuleOptions::default().with_rule_id("jobs"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateRuleId(id) if id == "jobs"));

    let err = engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default().with_rule_id("rule-0"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateRuleId(_)));
    assert_eq!(engine.rules().len(), 2);
}

#[tokio::test]
async fn test_malformed_lock_pattern_is_rejected() {
    let mut engine = Engine::new(settings(), Arc::new(MemoryStore::new()), Arc::new(RecordingMetrics::default()));
    let (callback, _rx) = recording_callback();
    let err = engine
        .add_rule(done_rule(), "jobs/:id", callback, RuleOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Pattern(PatternError::NotAbsolute { .. })));
    assert!(engine.rules().is_empty());
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let mut engine = Engine::new(settings(), Arc::new(MemoryStore::new()), Arc::new(RecordingMetrics::default()));
    let (callback, _rx) = recording_callback();
    engine
        .add_rule(done_rule(), "/jobs/:id", callback.clone(), RuleOptions::default())
        .unwrap();
    assert_eq!(engine.state(), EngineState::Created);

    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(matches!(engine.start(), Err(Error::InvalidState(_))));
    assert!(matches!(
        engine.add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default()),
        Err(Error::InvalidState(_))
    ));

    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    engine.stop().await.unwrap();
    assert!(matches!(engine.start(), Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_start_rejects_invalid_settings() {
    let mut settings = settings();
    settings.engine.channel_buffer_size = 0;
    let mut engine = Engine::new(settings, Arc::new(MemoryStore::new()), Arc::new(RecordingMetrics::default()));
    let (callback, _rx) = recording_callback();
    engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .unwrap();

    assert!(matches!(engine.start(), Err(Error::Config(_))));
    assert_eq!(engine.state(), EngineState::Created);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_watched_change_invokes_callback() {
    enable_logger();
    let store = MemoryStore::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let mut engine = Engine::new(settings(), Arc::new(store.clone()), metrics.clone());
    let (callback, mut rx) = recording_callback();
    engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default().with_rule_id("job-done"))
        .unwrap();
    engine.start().unwrap();
    wait_for_watch(&store).await;

    store.put("/jobs/1/state", "running", None).await.unwrap();
    store.put("/jobs/1/state", "done", None).await.unwrap();

    let task = next_task(&mut rx).await;
    assert_eq!(task.rule_id, "job-done");
    assert_eq!(task.attribute("id"), Some("1"));
    assert_eq!(task.source(), Some(SOURCE_WATCHER));

    engine.stop().await.unwrap();
    // the lock is released once the callback returns
    assert!(store.get_prefix("/rules-locks/").await.unwrap().is_empty());
    assert!(metrics.lock_attempts.lock().iter().all(|a| a.success));
}

#[tokio::test]
async fn test_crawler_finds_preexisting_state() {
    let store = MemoryStore::new();
    store.put("/jobs/7/state", "done", None).await.unwrap();

    let mut settings = settings();
    settings.crawler.enabled = true;
    settings.crawler.interval_ms = 60_000;
    let mut engine = Engine::new(settings, Arc::new(store.clone()), Arc::new(RecordingMetrics::default()));
    let (callback, mut rx) = recording_callback();
    engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .unwrap();
    engine.start().unwrap();

    let task = next_task(&mut rx).await;
    assert_eq!(task.attribute("id"), Some("7"));
    assert_eq!(task.source(), Some(SOURCE_CRAWLER));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_polling_rule_is_not_watched() {
    let store = MemoryStore::new();
    let mut settings = settings();
    settings.crawler.enabled = true;
    settings.crawler.interval_ms = 100;
    settings.crawler.jitter_percent = 0.0;
    let mut engine = Engine::new(settings, Arc::new(store.clone()), Arc::new(RecordingMetrics::default()));
    let (callback, mut rx) = recording_callback();
    engine
        .add_polling_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .unwrap();
    assert!(engine.rules().watch_prefixes().is_empty());
    engine.start().unwrap();

    store.put("/jobs/3/state", "done", None).await.unwrap();
    let task = next_task(&mut rx).await;
    assert_eq!(task.source(), Some(SOURCE_CRAWLER));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_watch_is_restarted() {
    enable_logger();
    let store = MemoryStore::new();
    let mut engine = Engine::new(settings(), Arc::new(store.clone()), Arc::new(RecordingMetrics::default()));
    let (callback, mut rx) = recording_callback();
    engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .unwrap();
    engine.start().unwrap();
    wait_for_watch(&store).await;

    store.fail_watches(StoreError::Compacted { revision: 1 });
    assert_eq!(store.watcher_count(), 0);
    wait_for_watch(&store).await;

    store.put("/jobs/2/state", "done", None).await.unwrap();
    assert_eq!(next_task(&mut rx).await.attribute("id"), Some("2"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_times_out_on_stuck_callback() {
    let store = MemoryStore::new();
    let mut settings = settings();
    settings.engine.shutdown_timeout_ms = 100;
    let mut engine = Engine::new(settings, Arc::new(store.clone()), Arc::new(RecordingMetrics::default()));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let callback = callback_fn(move |_task: RuleTask| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(());
            futures::future::pending::<()>().await;
            Ok::<(), CallbackError>(())
        }
    });
    engine
        .add_rule(done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .unwrap();
    engine.start().unwrap();
    wait_for_watch(&store).await;
    store.put("/jobs/1/state", "done", None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), started_rx.recv()).await.unwrap();

    let err = engine.stop().await.unwrap_err();
    assert!(matches!(err, Error::ShutdownTimeout(_)));
    assert_eq!(engine.state(), EngineState::Stopped);
}
