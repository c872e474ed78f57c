use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::supervisor::supervise_watcher;
use super::Tasks;
use crate::constants::LOCKER_COOL_OFF;
use crate::constants::LOCKER_MAP;
use crate::constants::LOCKER_NESTED;
use crate::constants::LOCKER_SHARED_SESSION;
use crate::constants::LOCKER_STORE;
use crate::processor::ChildContextProvider;
use crate::processor::ContextProvider;
use crate::processor::KeyProcessor;
use crate::processor::RuleRegistration;
use crate::worker::spawn_workers;
use crate::worker::RuleWorker;
use crate::CoolOffLocker;
use crate::Crawler;
use crate::CrawlerMutex;
use crate::KvStore;
use crate::LockPruner;
use crate::MapLocker;
use crate::MetricsLocker;
use crate::MetricsSink;
use crate::NestedLocker;
use crate::Result;
use crate::RuleLocker;
use crate::RuleManager;
use crate::SessionManager;
use crate::Settings;
use crate::SharedSessionLocker;
use crate::StoreLocker;

/// Assembles and spawns the background tasks of one engine run.
pub(super) struct EngineBuilder<'a> {
    pub(super) settings: &'a Settings,
    pub(super) store: Arc<dyn KvStore>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) contexts: Option<Arc<dyn ContextProvider>>,
}

impl EngineBuilder<'_> {
    pub(super) fn spawn(
        self,
        rules: Arc<RuleManager>,
        registrations: Arc<Vec<RuleRegistration>>,
    ) -> Result<Tasks> {
        let settings = self.settings;
        let producers = CancellationToken::new();
        let shutdown = CancellationToken::new();

        let (sender, receiver) = mpsc::channel(settings.engine.channel_buffer_size);
        let processor = KeyProcessor::new(
            rules.clone(),
            registrations,
            sender,
            self.metrics.clone(),
            settings.lock.lock_key_prefix.clone(),
        );

        let locker = self.rule_locker(&shutdown);
        let contexts = self
            .contexts
            .clone()
            .unwrap_or_else(|| Arc::new(ChildContextProvider::new(shutdown.clone())));
        let worker = RuleWorker::new(self.store.clone(), locker, contexts, self.metrics.clone());
        let worker_handles = spawn_workers(settings.engine.concurrency, receiver, worker);

        let mut producer_handles = Vec::new();
        for prefix in rules.watch_prefixes() {
            info!(prefix = %prefix.prefix, priority = prefix.priority, "watching prefix");
            producer_handles.push(tokio::spawn(supervise_watcher(
                prefix.prefix,
                self.store.clone(),
                processor.clone(),
                self.metrics.clone(),
                settings.engine.watch_timeout(),
                settings.engine.watch_restart_delay(),
                producers.clone(),
            )));
        }

        let crawl_prefixes: Vec<String> = rules.get_prioritized_prefixes().into_iter().map(|p| p.prefix).collect();
        if settings.crawler.enabled && !crawl_prefixes.is_empty() {
            let crawler = Crawler::new(
                self.store.clone(),
                processor,
                crawl_prefixes,
                settings.crawler.clone(),
                self.crawler_mutex(),
                self.metrics.clone(),
                producers.clone(),
            );
            producer_handles.push(tokio::spawn(async move { crawler.run().await }));
        }

        let pruner_handle = settings.pruner.enabled.then(|| {
            let pruner = LockPruner::new(
                self.store.clone(),
                settings.pruner_prefixes(),
                settings.pruner.timeout(),
                self.metrics.clone(),
            );
            let interval = settings.pruner.interval();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pruner.run(interval, shutdown).await })
        });

        Ok(Tasks {
            producers,
            shutdown,
            producer_handles,
            worker_handles,
            pruner_handle,
        })
    }

    /// `Metrics(Nested(Metrics(map), Metrics(store)))`, behind a cool-off
    /// locker when configured.
    fn rule_locker(
        &self,
        shutdown: &CancellationToken,
    ) -> Arc<dyn RuleLocker> {
        let settings = self.settings;
        let timeout = settings.engine.lock_acquisition_timeout();

        let (name, distributed): (&'static str, Arc<dyn RuleLocker>) = if settings.lock.shared_session {
            let sessions = SessionManager::start(
                self.store.clone(),
                settings.lock.session_ttl(),
                settings.lock.session_retry_delay(),
                shutdown.clone(),
            );
            (
                LOCKER_SHARED_SESSION,
                Arc::new(SharedSessionLocker::new(self.store.clone(), sessions, timeout)),
            )
        } else {
            (LOCKER_STORE, Arc::new(StoreLocker::new(self.store.clone(), timeout)))
        };

        let own = self.metered(LOCKER_MAP, Arc::new(MapLocker::new()));
        let nested = self.metered(name, distributed);
        let mut locker = self.metered(LOCKER_NESTED, Arc::new(NestedLocker::new(own, nested)));

        if let Some(window) = settings.lock.cool_off() {
            let cool_off = self.metered(LOCKER_COOL_OFF, Arc::new(CoolOffLocker::new(window)));
            locker = Arc::new(NestedLocker::new(cool_off, locker));
        }
        locker
    }

    fn metered(
        &self,
        name: &'static str,
        inner: Arc<dyn RuleLocker>,
    ) -> Arc<dyn RuleLocker> {
        Arc::new(MetricsLocker::new(name, inner, self.metrics.clone()))
    }

    fn crawler_mutex(&self) -> Option<CrawlerMutex> {
        let key = self.settings.crawler.mutex_key.clone()?;
        let locker = StoreLocker::new(self.store.clone(), self.settings.crawler.mutex_timeout());
        Some(CrawlerMutex {
            locker: self.metered(LOCKER_STORE, Arc::new(locker)),
            key,
            ttl: self.settings.lock.session_ttl(),
        })
    }
}
