//! Atomic multi-resource transactions.
//!
//! A bundle is an ordered batch of create/update/delete/read requests
//! committed all-or-nothing on top of the KV engine's bounded conditional
//! transactions. The lifecycle states double as locks:
//!
//! 1. **Pre-resolution**: current versions of every non-create target are
//!    looked up; a missing target fails the whole bundle.
//! 2. **Staging**: delete targets are locked (`AVAILABLE -> LOCKED`), then
//!    new versions are inserted as `PENDING` and locked delete targets move
//!    to `PENDING_DELETE`, in bounded transactional sub-batches.
//! 3. **Commit**: staged inserts are promoted `PENDING -> AVAILABLE`,
//!    staged deletes move `PENDING_DELETE -> DELETED`, and reads execute
//!    their point-gets. The previous version of an update is left
//!    `AVAILABLE` throughout; readers resolve "latest" by version order.
//!
//! Any failure after staging began triggers rollback: staged inserts are
//! deleted, locked and staged delete targets return to `AVAILABLE`.
//! Rollback is idempotent; its failures are logged and the bundle is still
//! reported as failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::CoreConfig;
use crate::error::{BundleError, StorageResult};
use crate::kv::{KvError, WriteDescriptor, MAX_TRANSACT_ITEMS};
use crate::params;
use crate::store::VersionStore;
use crate::types::{DocumentStatus, ItemKey, StoredItem};

/// Operation kind of one bundle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleOperation {
    /// Insert a new resource at version 1.
    Create,
    /// Insert a new version of an existing resource.
    Update,
    /// Logically delete the current version.
    Delete,
    /// Return the current version.
    Read,
}

impl fmt::Display for BundleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        f.write_str(s)
    }
}

/// One entry of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// What to do.
    pub operation: BundleOperation,
    /// Resource type of the target.
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Logical id; required for update/delete/read, optional for create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Payload for create/update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// Owning tenant, present iff multi-tenancy is enabled.
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Per-entry outcome of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Echoed operation.
    pub operation: BundleOperation,
    /// Echoed resource type.
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Logical id the entry resolved to.
    pub id: String,
    /// Version written or read, when the entry got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u64>,
    /// System stamp of that version.
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Decoded resource for create/update/read entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// Failure description for the offending entry of a failed bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResponse {
    fn pending(request: &BatchRequest) -> Self {
        Self {
            operation: request.operation,
            resource_type: request.resource_type.clone(),
            id: request.id.clone().unwrap_or_default(),
            vid: None,
            last_modified: None,
            resource: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    /// A new version inserted as PENDING; rollback deletes it.
    StagedInsert,
    /// A delete target moved AVAILABLE -> LOCKED; rollback unlocks it.
    LockedCurrent,
    /// A delete target moved LOCKED -> PENDING_DELETE; rollback restores it.
    StagedDelete,
}

#[derive(Debug, Clone)]
struct LockEntry {
    key: ItemKey,
    resource_type: String,
    kind: LockKind,
}

/// Coordinator for atomic multi-resource bundles.
pub struct BundleService {
    store: Arc<VersionStore>,
    config: CoreConfig,
}

impl BundleService {
    /// Creates a bundle service over the version store.
    pub fn new(store: Arc<VersionStore>, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Executes a bundle atomically, returning per-entry responses.
    ///
    /// On failure every acquired transient state is rolled back and the
    /// error carries the per-entry outcomes collected so far.
    pub async fn transact(&self, requests: Vec<BatchRequest>) -> StorageResult<Vec<BatchResponse>> {
        for (index, request) in requests.iter().enumerate() {
            self.config.assert_tenancy(request.tenant_id.as_deref())?;
            self.validate(index, request)?;
        }

        // Phase 0: resolve the current version of every non-create target.
        let mut current: HashMap<usize, StoredItem> = HashMap::new();
        for (index, request) in requests.iter().enumerate() {
            if matches!(request.operation, BundleOperation::Create) {
                continue;
            }
            let id = request.id.as_deref().expect("validated");
            let item = self
                .store
                .read_most_recent_item(&request.resource_type, id, request.tenant_id.as_deref())
                .await?;
            current.insert(index, item);
        }

        let mut responses: Vec<BatchResponse> =
            requests.iter().map(BatchResponse::pending).collect();
        let mut locks: Vec<LockEntry> = Vec::new();
        // request index -> position in `locks` for delete targets
        let mut delete_locks: HashMap<usize, usize> = HashMap::new();

        // Phase 1a: lock delete targets.
        let now_ms = Utc::now().timestamp_millis();
        let mut lock_writes = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            if !matches!(request.operation, BundleOperation::Delete) {
                continue;
            }
            let target = &current[&index];
            lock_writes.push((
                index,
                WriteDescriptor::Transition(params::transition(
                    target.key(),
                    &request.resource_type,
                    DocumentStatus::Available,
                    DocumentStatus::Locked,
                    now_ms,
                    self.config.lock_duration_ms,
                )),
            ));
        }
        if let Err(err) = self
            .submit_chunked(lock_writes, &mut locks, &mut delete_locks, LockKind::LockedCurrent)
            .await
        {
            self.rollback(&locks).await;
            return Err(self.fail(responses, "failed to lock delete targets", err));
        }

        // Phase 1b: stage new versions and delete markers.
        let mut staged_items: HashMap<usize, StoredItem> = HashMap::new();
        let mut staging_writes = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            match request.operation {
                BundleOperation::Create => {
                    let id = request
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    let item = codec::encode_for_insert(
                        request.resource.as_ref().expect("validated"),
                        &request.resource_type,
                        &id,
                        1,
                        DocumentStatus::Pending,
                        request.tenant_id.as_deref(),
                    )?;
                    responses[index].id = id;
                    staging_writes
                        .push((index, WriteDescriptor::Put(params::insert_new_version(item.clone()))));
                    staged_items.insert(index, item);
                }
                BundleOperation::Update => {
                    let id = request.id.as_deref().expect("validated");
                    let vid = current[&index].vid + 1;
                    let item = codec::encode_for_insert(
                        request.resource.as_ref().expect("validated"),
                        &request.resource_type,
                        id,
                        vid,
                        DocumentStatus::Pending,
                        request.tenant_id.as_deref(),
                    )?;
                    staging_writes
                        .push((index, WriteDescriptor::Put(params::insert_new_version(item.clone()))));
                    staged_items.insert(index, item);
                }
                BundleOperation::Delete => {
                    let target = &current[&index];
                    staging_writes.push((
                        index,
                        WriteDescriptor::Transition(params::transition(
                            target.key(),
                            &request.resource_type,
                            DocumentStatus::Locked,
                            DocumentStatus::PendingDelete,
                            now_ms,
                            self.config.lock_duration_ms,
                        )),
                    ));
                }
                BundleOperation::Read => {}
            }
        }
        if let Err(err) = self
            .submit_chunked(staging_writes, &mut locks, &mut delete_locks, LockKind::StagedInsert)
            .await
        {
            self.rollback(&locks).await;
            return Err(self.fail(responses, "staging failed", err));
        }

        // Phase 2: promote staged writes.
        let now_ms = Utc::now().timestamp_millis();
        let mut commit_writes = Vec::new();
        for lock in &locks {
            let (from, to) = match lock.kind {
                LockKind::StagedInsert => (DocumentStatus::Pending, DocumentStatus::Available),
                LockKind::StagedDelete => {
                    (DocumentStatus::PendingDelete, DocumentStatus::Deleted)
                }
                LockKind::LockedCurrent => continue,
            };
            commit_writes.push(WriteDescriptor::Transition(params::transition(
                lock.key.clone(),
                &lock.resource_type,
                from,
                to,
                now_ms,
                self.config.lock_duration_ms,
            )));
        }
        for chunk in commit_writes.chunks(MAX_TRANSACT_ITEMS) {
            if let Err(err) = self.store.transact(chunk.to_vec()).await {
                self.rollback(&locks).await;
                return Err(self.fail(responses, "commit failed", err));
            }
        }

        // Phase 2: execute reads against the resolved current versions.
        for (index, request) in requests.iter().enumerate() {
            if !matches!(request.operation, BundleOperation::Read) {
                continue;
            }
            let target = &current[&index];
            let item = match self.store.get_item(params::get_version(target.key())).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    self.rollback(&locks).await;
                    responses[index].error = Some("read target disappeared".to_string());
                    return Err(BundleError::Failed {
                        reason: format!(
                            "read target {}/{} disappeared",
                            request.resource_type, responses[index].id
                        ),
                        responses,
                    }
                    .into());
                }
                Err(err) => {
                    self.rollback(&locks).await;
                    return Err(self.fail(responses, "read execution failed", err));
                }
            };
            responses[index].vid = Some(item.vid);
            responses[index].last_modified = item.last_updated();
            responses[index].resource = Some(codec::decode_for_read(&item, None));
        }

        // Fill in write responses.
        for (index, request) in requests.iter().enumerate() {
            match request.operation {
                BundleOperation::Create | BundleOperation::Update => {
                    let item = &staged_items[&index];
                    responses[index].id = codec::split_storage_id(
                        &item.storage_id,
                        item.tenant_id.as_deref(),
                    )
                    .to_string();
                    responses[index].vid = Some(item.vid);
                    responses[index].last_modified = item.last_updated();
                    responses[index].resource = Some(codec::decode_for_read(item, None));
                }
                BundleOperation::Delete => {
                    responses[index].vid = Some(current[&index].vid);
                }
                BundleOperation::Read => {}
            }
        }

        Ok(responses)
    }

    fn validate(&self, index: usize, request: &BatchRequest) -> StorageResult<()> {
        let malformed = |message: &str| {
            BundleError::MalformedEntry {
                index,
                message: message.to_string(),
            }
            .into()
        };
        match request.operation {
            BundleOperation::Create => {
                if request.resource.is_none() {
                    return Err(malformed("create entry requires a resource"));
                }
            }
            BundleOperation::Update => {
                if request.id.is_none() {
                    return Err(malformed("update entry requires an id"));
                }
                if request.resource.is_none() {
                    return Err(malformed("update entry requires a resource"));
                }
            }
            BundleOperation::Delete | BundleOperation::Read => {
                if request.id.is_none() {
                    return Err(malformed("entry requires an id"));
                }
            }
        }
        Ok(())
    }

    /// Submits `writes` in bounded transactional sub-batches, registering a
    /// lock entry for every applied write so rollback knows what to undo.
    ///
    /// `insert_kind` classifies `Put` writes; `Transition` writes on delete
    /// targets advance that target's existing lock entry (or create one at
    /// `LockedCurrent`).
    async fn submit_chunked(
        &self,
        writes: Vec<(usize, WriteDescriptor)>,
        locks: &mut Vec<LockEntry>,
        delete_locks: &mut HashMap<usize, usize>,
        insert_kind: LockKind,
    ) -> Result<(), KvError> {
        for chunk in writes.chunks(MAX_TRANSACT_ITEMS) {
            self.store
                .transact(chunk.iter().map(|(_, w)| w.clone()).collect())
                .await?;

            for (index, write) in chunk {
                match write {
                    WriteDescriptor::Put(put) => locks.push(LockEntry {
                        key: put.item.key(),
                        resource_type: put.item.resource_type.clone(),
                        kind: insert_kind,
                    }),
                    WriteDescriptor::Transition(transition) => {
                        match delete_locks.get(index) {
                            Some(&position) => locks[position].kind = LockKind::StagedDelete,
                            None => {
                                locks.push(LockEntry {
                                    key: transition.key.clone(),
                                    resource_type: transition.resource_type.clone(),
                                    kind: LockKind::LockedCurrent,
                                });
                                delete_locks.insert(*index, locks.len() - 1);
                            }
                        }
                    }
                    WriteDescriptor::Delete(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Undoes every acquired transient state. Idempotent; failures are
    /// logged with the offending keys and do not interrupt the sweep.
    async fn rollback(&self, locks: &[LockEntry]) {
        let now_ms = Utc::now().timestamp_millis();
        for lock in locks {
            let result = match lock.kind {
                LockKind::StagedInsert => self
                    .store
                    .delete_version(params::delete_version(lock.key.clone()))
                    .await
                    .map(|_| ()),
                LockKind::LockedCurrent => self
                    .store
                    .transition(params::transition(
                        lock.key.clone(),
                        &lock.resource_type,
                        DocumentStatus::Locked,
                        DocumentStatus::Available,
                        now_ms,
                        self.config.lock_duration_ms,
                    ))
                    .await
                    .map(|_| ()),
                LockKind::StagedDelete => self
                    .store
                    .transition(params::transition(
                        lock.key.clone(),
                        &lock.resource_type,
                        DocumentStatus::PendingDelete,
                        DocumentStatus::Available,
                        now_ms,
                        self.config.lock_duration_ms,
                    ))
                    .await
                    .map(|_| ()),
            };
            match result {
                Ok(()) => debug!(key = %lock.key, "rolled back bundle participant"),
                Err(err) if err.is_condition_failure() => {
                    // Already rolled back or since reclaimed; both are fine.
                    debug!(key = %lock.key, "rollback transition no longer applicable");
                }
                Err(err) => {
                    warn!(key = %lock.key, error = %err, "rollback failed for bundle participant");
                }
            }
        }
    }

    fn fail(
        &self,
        responses: Vec<BatchResponse>,
        reason: &str,
        err: KvError,
    ) -> crate::error::StorageError {
        warn!(error = %err, "bundle failed: {reason}");
        BundleError::Failed {
            reason: format!("{reason}: {err}"),
            responses,
        }
        .into()
    }
}
