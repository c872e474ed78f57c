mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use d_rules::KvStore;
use d_rules::MemoryStore;
use d_rules::PrometheusMetrics;
use d_rules::RuleOptions;
use d_rules::SOURCE_WATCHER;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_a_store_run_a_callback_once() {
    enable_logger();
    let store = MemoryStore::new();
    let recorder = CallbackRecorder::default();

    let mut first = started_engine(
        test_settings(),
        &store,
        recorder.callback(store.clone(), Duration::from_millis(200), "handled"),
    );
    let mut second = started_engine(
        test_settings(),
        &store,
        recorder.callback(store.clone(), Duration::from_millis(200), "handled"),
    );
    wait_for_watchers(&store, 2).await;

    store.put("/jobs/1/state", "done", None).await.unwrap();

    let calls = recorder.clone();
    assert!(wait_until(WAIT, move || calls.calls() >= 1).await);
    assert!(wait_for_value(&store, "/jobs/1/state", Some("handled")).await);
    // give the losing engine time to acquire and re-check
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.max_running(), 1);

    first.stop().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_lock_keys_run_in_parallel() {
    let store = MemoryStore::new();
    let recorder = CallbackRecorder::default();
    let mut engine = started_engine(
        test_settings(),
        &store,
        recorder.callback(store.clone(), Duration::from_millis(300), "handled"),
    );
    wait_for_watchers(&store, 1).await;

    store.put("/jobs/1/state", "done", None).await.unwrap();
    store.put("/jobs/2/state", "done", None).await.unwrap();

    let calls = recorder.clone();
    assert!(wait_until(WAIT, move || calls.calls() == 2).await);
    engine.stop().await.unwrap();
    assert_eq!(recorder.max_running(), 2);
}

#[tokio::test]
async fn test_cool_off_rejects_repeated_triggers() {
    let store = MemoryStore::new();
    let mut settings = test_settings();
    settings.lock.cool_off_ms = Some(10_000);
    let (callback, mut tasks) = channel_callback();
    let mut engine = started_engine(settings, &store, callback);
    wait_for_watchers(&store, 1).await;

    store.put("/jobs/1/state", "done", None).await.unwrap();
    let first = tokio::time::timeout(WAIT, tasks.recv()).await.unwrap().unwrap();
    assert_eq!(first.source(), Some(SOURCE_WATCHER));

    store.put("/jobs/1/state", "running", None).await.unwrap();
    store.put("/jobs/1/state", "done", None).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(300), tasks.recv()).await.is_err());

    // other lock keys are unaffected
    store.put("/jobs/2/state", "done", None).await.unwrap();
    let other = tokio::time::timeout(WAIT, tasks.recv()).await.unwrap().unwrap();
    assert_eq!(other.attribute("id"), Some("2"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_pruner_reclaims_orphaned_lock() {
    enable_logger();
    let store = MemoryStore::new();
    let orphan = store.lease_grant(Duration::from_secs(600)).await.unwrap();
    store.put("/rules-locks/jobs/9", "gone", Some(orphan)).await.unwrap();

    let mut settings = test_settings();
    settings.pruner.enabled = true;
    settings.pruner.interval_ms = 50;
    settings.pruner.timeout_ms = 200;
    let (callback, _tasks) = channel_callback();
    let mut engine = started_engine(settings, &store, callback);

    assert!(wait_for_value(&store, "/rules-locks/jobs/9", None).await);
    assert!(store.lease_keep_alive(orphan).await.is_err());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_running_callbacks() {
    let store = MemoryStore::new();
    let recorder = CallbackRecorder::default();
    let mut engine = started_engine(
        test_settings(),
        &store,
        recorder.callback(store.clone(), Duration::from_millis(150), "handled"),
    );
    wait_for_watchers(&store, 1).await;

    store.put("/jobs/1/state", "done", None).await.unwrap();
    let calls = recorder.clone();
    assert!(wait_until(WAIT, move || calls.calls() == 1).await);

    engine.stop().await.unwrap();
    let state = store.get("/jobs/1/state").await.unwrap().unwrap();
    assert_eq!(state.value, "handled");
    assert!(store.get_prefix("/rules-locks/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prometheus_sink_records_engine_activity() {
    let store = MemoryStore::new();
    let metrics = Arc::new(PrometheusMetrics::new("rules").unwrap());
    let mut engine = engine_with(test_settings(), &store, metrics.clone());
    let (callback, mut tasks) = channel_callback();
    engine
        .add_rule(
            job_done_rule(),
            "/jobs/:id",
            callback,
            RuleOptions::default().with_rule_id("job-done"),
        )
        .unwrap();
    engine.start().unwrap();
    wait_for_watchers(&store, 1).await;

    store.put("/jobs/4/state", "done", None).await.unwrap();
    tokio::time::timeout(WAIT, tasks.recv()).await.unwrap().unwrap();
    engine.stop().await.unwrap();

    let text = metrics.gather_text();
    assert!(text.contains("rules_rule_evaluations"));
    assert!(text.contains("rules_lock_attempts"));
    assert!(text.contains("rules_watch_events"));
    assert!(text.contains("job-done"));
}
