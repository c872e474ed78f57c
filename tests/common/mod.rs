#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use d_rules::callback_fn;
use d_rules::CallbackError;
use d_rules::DynamicRule;
use d_rules::Engine;
use d_rules::KvStore;
use d_rules::MemoryStore;
use d_rules::MetricsSink;
use d_rules::NoopMetrics;
use d_rules::RuleCallback;
use d_rules::RuleOptions;
use d_rules::RuleTask;
use d_rules::Settings;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(3);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Watch-only settings with a short restart delay; crawler and pruner off.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.engine.concurrency = 2;
    settings.engine.watch_restart_delay_ms = 50;
    settings.engine.lock_acquisition_timeout_ms = 500;
    settings.engine.shutdown_timeout_ms = 2000;
    settings.crawler.enabled = false;
    settings.pruner.enabled = false;
    settings
}

pub fn job_done_rule() -> DynamicRule {
    DynamicRule::equals_literal("/jobs/:id/state", Some("done")).expect("valid pattern")
}

/// Records every invocation and the highest number of callbacks observed
/// running at once.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    pub calls: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
}

impl CallbackRecorder {
    /// A callback sleeping `hold`, then writing `after` to the state key of
    /// the job it fired for.
    pub fn callback(
        &self,
        store: MemoryStore,
        hold: Duration,
        after: &'static str,
    ) -> Arc<dyn RuleCallback> {
        let recorder = self.clone();
        callback_fn(move |task: RuleTask| {
            let recorder = recorder.clone();
            let store = store.clone();
            async move {
                recorder.calls.fetch_add(1, Ordering::SeqCst);
                let running = recorder.running.fetch_add(1, Ordering::SeqCst) + 1;
                recorder.max_running.fetch_max(running, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                let key = format!("/jobs/{}/state", task.attribute("id").unwrap_or_default());
                let result = store.put(&key, after, None).await;
                recorder.running.fetch_sub(1, Ordering::SeqCst);
                result.map(|_| ()).map_err(|e| Box::new(e) as CallbackError)
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

pub fn channel_callback() -> (Arc<dyn RuleCallback>, mpsc::UnboundedReceiver<RuleTask>) {
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

pub fn engine_with(
    settings: Settings,
    store: &MemoryStore,
    metrics: Arc<dyn MetricsSink>,
) -> Engine {
    Engine::new(settings, Arc::new(store.clone()), metrics)
}

pub fn started_engine(
    settings: Settings,
    store: &MemoryStore,
    callback: Arc<dyn RuleCallback>,
) -> Engine {
    let mut engine = engine_with(settings, store, Arc::new(NoopMetrics));
    engine
        .add_rule(job_done_rule(), "/jobs/:id", callback, RuleOptions::default())
        .expect("rule registered");
    engine.start().expect("engine started");
    engine
}

pub async fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn wait_for_watchers(
    store: &MemoryStore,
    count: usize,
) {
    let store = store.clone();
    assert!(
        wait_until(WAIT, move || store.watcher_count() >= count).await,
        "watchers not subscribed in time"
    );
}

/// Polls `key` until it holds `expected` (`None` meaning absent).
pub async fn wait_for_value(
    store: &MemoryStore,
    key: &str,
    expected: Option<&str>,
) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let current = store.get(key).await.ok().flatten().map(|kv| kv.value);
        if current.as_deref() == expected {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
