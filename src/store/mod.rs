//! Backing key-value store contract.
//!
//! The engine only needs a small, etcd-like surface from its store:
//! - point reads and prefix listings with creation revisions and leases
//! - puts/deletes and a compare-then-apply transaction
//! - prefix watches delivering put/delete events in revision order
//! - leases with TTL, keep-alive and revoke
//!
//! [`MemoryStore`] is a single-process implementation of this contract.

mod memory;
mod reader;


use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
pub use memory::*;
#[cfg(test)]
use mockall::automock;
pub use reader::*;

use crate::StoreError;

pub type LeaseId = i64;
pub type Revision = i64;

/// A stored key with its store-assigned metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created. Reset when the key is deleted
    /// and created again.
    pub create_revision: Revision,
    pub mod_revision: Revision,
    pub lease: Option<LeaseId>,
}

/// A single change observed on a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// New value; `None` when the key was deleted
    pub value: Option<String>,
    pub revision: Revision,
}

impl WatchEvent {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Transaction guard, evaluated atomically before the success operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Key's create revision equals `revision`; 0 means "key absent"
    CreateRevision { key: String, revision: Revision },
    /// Key's current value equals `value`; `None` means "key absent"
    Value { key: String, value: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: String,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<KeyValue>, StoreError>;

    /// All keys starting with `prefix`, sorted by key
    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<KeyValue>, StoreError>;

    /// Returns the revision of the write
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError>;

    /// Returns whether a key was removed
    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool, StoreError>;

    /// Applies `success` iff every compare holds. Returns whether it did.
    async fn txn(
        &self,
        compares: Vec<Compare>,
        success: Vec<TxnOp>,
    ) -> Result<bool, StoreError>;

    /// Subscribes to changes of every key under `prefix`. Dropping the
    /// stream cancels the subscription.
    async fn watch(
        &self,
        prefix: &str,
    ) -> Result<WatchStream, StoreError>;

    async fn lease_grant(
        &self,
        ttl: Duration,
    ) -> Result<LeaseId, StoreError>;

    /// Refreshes a lease once. Fails with `LeaseNotFound` once it expired.
    async fn lease_keep_alive(
        &self,
        lease: LeaseId,
    ) -> Result<(), StoreError>;

    /// Revokes a lease, deleting every key attached to it
    async fn lease_revoke(
        &self,
        lease: LeaseId,
    ) -> Result<(), StoreError>;
}
