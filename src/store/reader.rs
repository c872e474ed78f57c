use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::KvStore;
use crate::StoreError;

/// Read access used by rule satisfaction checks.
#[async_trait]
pub trait ReadApi: Send + Sync {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// Reads through to the backing store, aborting when `cancel` fires.
#[derive(Clone)]
pub struct StoreReader {
    store: Arc<dyn KvStore>,
    cancel: CancellationToken,
}

impl StoreReader {
    pub fn new(
        store: Arc<dyn KvStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self { store, cancel }
    }
}

#[async_trait]
impl ReadApi for StoreReader {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            kv = self.store.get(key) => Ok(kv?.map(|kv| kv.value)),
        }
    }
}

/// Reads from an in-memory snapshot of the keyspace, as captured by one
/// crawl. Keys outside the snapshot read as absent.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReader {
    values: HashMap<String, String>,
}

impl SnapshotReader {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl ReadApi for SnapshotReader {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }
}
