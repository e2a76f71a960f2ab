//! Primary-table interface.
//!
//! The core is written against [`KvApi`], the fixed interface of a KV store
//! with conditional writes, bounded multi-item transactions, descending
//! range queries, and an ordered change feed. Engines implement this trait;
//! the crate ships [`InMemoryKv`] for the default feature set.
//!
//! Descriptors are plain data. Only the param builder constructs guarded
//! descriptors, so the guard semantics live in exactly one place.

mod memory;

pub use memory::InMemoryKv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DocumentStatus, ItemKey, StoredItem};

/// Upper bound on descriptors per [`KvApi::transact_write`] call.
///
/// Mirrors the bounded conditional-transaction size of the underlying
/// platform; larger batches must be split by the caller.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Insert descriptor for a new version.
#[derive(Debug, Clone)]
pub struct PutDescriptor {
    /// The item to store.
    pub item: StoredItem,
    /// Require that no item exists under the same `(storageId, vid)` key.
    pub if_absent: bool,
}

/// Guarded status-transition descriptor.
///
/// The transition succeeds when the stored item's resource type matches and
/// either its status equals `from`, or the item sits in a reclaimable
/// transient state whose `lockEndTs` has passed `reclaim_before`.
#[derive(Debug, Clone)]
pub struct TransitionDescriptor {
    /// Target item.
    pub key: ItemKey,
    /// Expected resource type of the stored item.
    pub resource_type: String,
    /// Expected current status.
    pub from: DocumentStatus,
    /// Status to transition to.
    pub to: DocumentStatus,
    /// Epoch millis; a stale lock is one with `lockEndTs` strictly below this.
    pub reclaim_before: i64,
    /// New `lockEndTs` stamped on success.
    pub lock_end_ts: i64,
}

/// Unconditional delete of a specific version. Deleting an absent key is a
/// no-op, which keeps bundle rollback idempotent.
#[derive(Debug, Clone)]
pub struct DeleteDescriptor {
    /// Target item.
    pub key: ItemKey,
}

/// Point-get of a specific version.
#[derive(Debug, Clone)]
pub struct GetDescriptor {
    /// Target item.
    pub key: ItemKey,
}

/// Query for the most recent versions of one partition, descending on `vid`.
#[derive(Debug, Clone)]
pub struct QueryLatestDescriptor {
    /// Partition to query.
    pub storage_id: String,
    /// Maximum number of versions to return.
    pub limit: usize,
}

/// A single write inside a transactional batch.
#[derive(Debug, Clone)]
pub enum WriteDescriptor {
    /// Conditional insert.
    Put(PutDescriptor),
    /// Guarded status transition.
    Transition(TransitionDescriptor),
    /// Unconditional delete.
    Delete(DeleteDescriptor),
}

impl WriteDescriptor {
    /// The key this write addresses.
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Put(put) => put.item.key(),
            Self::Transition(transition) => transition.key.clone(),
            Self::Delete(delete) => delete.key.clone(),
        }
    }
}

/// Errors surfaced by KV engines.
#[derive(Error, Debug)]
pub enum KvError {
    /// A conditional expression on a single write was not satisfied.
    #[error("conditional check failed for {key}")]
    ConditionFailed {
        /// Key of the offending item.
        key: ItemKey,
    },

    /// A transactional batch was cancelled; no write in it was applied.
    #[error("transaction cancelled at descriptor {index:?}: {reason}")]
    TransactionCancelled {
        /// Index of the first failing descriptor, when known.
        index: Option<usize>,
        /// Engine-reported reason.
        reason: String,
    },

    /// The engine is temporarily unreachable.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),

    /// Internal engine error.
    #[error("kv store internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// Returns `true` if this error is a conditional-check or transactional
    /// cancellation, i.e. contention rather than an engine fault.
    pub fn is_condition_failure(&self) -> bool {
        matches!(
            self,
            Self::ConditionFailed { .. } | Self::TransactionCancelled { .. }
        )
    }
}

/// Kind of change-feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    /// A new item was written.
    Insert,
    /// An existing item was updated in place.
    Modify,
    /// An item was deleted from the table.
    Remove,
}

/// One record of the primary table's ordered change feed, carrying the old
/// and new images of the mutated item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// What happened.
    pub event: ChangeEvent,
    /// Key of the mutated item.
    pub key: ItemKey,
    /// Image before the mutation (absent for inserts).
    pub old_image: Option<StoredItem>,
    /// Image after the mutation (absent for removes).
    pub new_image: Option<StoredItem>,
}

impl ChangeRecord {
    /// The most recent image carried by this record: the new image when
    /// present, the old image for removes.
    pub fn image(&self) -> Option<&StoredItem> {
        self.new_image.as_ref().or(self.old_image.as_ref())
    }
}

/// Interface of the primary KV table.
///
/// All methods are suspension points; callers must assume interleaving of
/// other requests between any two calls.
#[async_trait]
pub trait KvApi: Send + Sync {
    /// Applies a single conditional insert.
    async fn put(&self, descriptor: PutDescriptor) -> Result<(), KvError>;

    /// Applies a single guarded status transition, returning the updated item.
    async fn transition(&self, descriptor: TransitionDescriptor) -> Result<StoredItem, KvError>;

    /// Deletes a specific version unconditionally.
    async fn delete(&self, descriptor: DeleteDescriptor) -> Result<(), KvError>;

    /// Point-get of a specific version.
    async fn get(&self, descriptor: GetDescriptor) -> Result<Option<StoredItem>, KvError>;

    /// Returns up to `limit` most recent versions of a partition, descending
    /// on `vid`.
    async fn query_latest(
        &self,
        descriptor: QueryLatestDescriptor,
    ) -> Result<Vec<StoredItem>, KvError>;

    /// Applies a batch of at most [`MAX_TRANSACT_ITEMS`] writes atomically:
    /// either every descriptor's condition holds and every write is applied,
    /// or nothing is.
    async fn transact_write(&self, descriptors: Vec<WriteDescriptor>) -> Result<(), KvError>;
}
