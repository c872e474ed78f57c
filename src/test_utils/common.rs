use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use crate::KvStore;
use crate::MemoryStore;

static LOGGER_INIT: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub fn memory_store() -> (MemoryStore, Arc<dyn KvStore>) {
    let store = MemoryStore::new();
    let shared: Arc<dyn KvStore> = Arc::new(store.clone());
    (store, shared)
}

/// Polls `check` until it holds or `wait` elapses.
pub async fn wait_until<F>(
    wait: Duration,
    mut check: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
