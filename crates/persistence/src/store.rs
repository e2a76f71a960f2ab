//! Point and range access over the primary table.
//!
//! The version store owns the read policy for version chains and passes
//! guarded writes through to the KV engine untouched. Conditional-check
//! failures on writes are returned as [`KvError`] so the issuing service
//! decides what they mean.

use std::sync::Arc;

use crate::codec;
use crate::error::{ResourceError, StorageResult};
use crate::kv::{
    DeleteDescriptor, GetDescriptor, KvApi, KvError, PutDescriptor, TransitionDescriptor,
    WriteDescriptor,
};
use crate::params;
use crate::types::{DocumentStatus, ItemKey, StoredItem};

/// Versioned access to the primary table.
pub struct VersionStore {
    kv: Arc<dyn KvApi>,
}

impl VersionStore {
    /// Creates a version store over the given KV engine.
    pub fn new(kv: Arc<dyn KvApi>) -> Self {
        Self { kv }
    }

    /// Returns the current item of a version chain.
    ///
    /// Queries the two most recent versions and applies the read policy:
    /// a DELETED head hides the chain; a readable head is returned; a
    /// PENDING head falls back to the prior version when that one is
    /// readable; anything else is not found.
    pub async fn read_most_recent_item(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<StoredItem> {
        let storage_id = codec::build_storage_id(id, tenant_id);
        let items = self
            .kv
            .query_latest(params::query_latest(storage_id, 2))
            .await
            .map_err(map_read_error)?;

        let mut chain = items
            .into_iter()
            .filter(|item| item.resource_type == resource_type);

        let not_found = || ResourceError::not_found(resource_type, id);

        let top = chain.next().ok_or_else(not_found)?;
        match top.document_status {
            DocumentStatus::Deleted => Err(not_found().into()),
            status if status.is_readable() => Ok(top),
            DocumentStatus::Pending => {
                let prior = chain.next().ok_or_else(not_found)?;
                if prior.document_status.is_readable() {
                    Ok(prior)
                } else {
                    Err(not_found().into())
                }
            }
            _ => Err(not_found().into()),
        }
    }

    /// Returns one specific committed version.
    ///
    /// Fails with `VersionNotFound` when the item is absent, stored under a
    /// different resource type, or not AVAILABLE.
    pub async fn read_version_item(
        &self,
        resource_type: &str,
        id: &str,
        vid: u64,
        tenant_id: Option<&str>,
    ) -> StorageResult<StoredItem> {
        let storage_id = codec::build_storage_id(id, tenant_id);
        let item = self
            .kv
            .get(params::get_version(ItemKey::new(storage_id, vid)))
            .await
            .map_err(map_read_error)?;

        match item {
            Some(item)
                if item.resource_type == resource_type
                    && item.document_status == DocumentStatus::Available =>
            {
                Ok(item)
            }
            _ => Err(ResourceError::version_not_found(resource_type, id, vid).into()),
        }
    }

    /// Returns up to `limit` most recent committed versions, newest first.
    pub async fn read_history_items(
        &self,
        resource_type: &str,
        id: &str,
        limit: usize,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<StoredItem>> {
        let storage_id = codec::build_storage_id(id, tenant_id);
        let items = self
            .kv
            .query_latest(params::query_latest(storage_id, limit))
            .await
            .map_err(map_read_error)?;

        Ok(items
            .into_iter()
            .filter(|item| {
                item.resource_type == resource_type
                    && item.document_status == DocumentStatus::Available
            })
            .collect())
    }

    /// Inserts a new version. The caller interprets condition failures.
    pub async fn insert(&self, descriptor: PutDescriptor) -> Result<(), KvError> {
        self.kv.put(descriptor).await
    }

    /// Applies a guarded status transition. The caller interprets condition
    /// failures.
    pub async fn transition(
        &self,
        descriptor: TransitionDescriptor,
    ) -> Result<StoredItem, KvError> {
        self.kv.transition(descriptor).await
    }

    /// Deletes a specific version unconditionally.
    pub async fn delete_version(&self, descriptor: DeleteDescriptor) -> Result<(), KvError> {
        self.kv.delete(descriptor).await
    }

    /// Point-get of a specific version, no read policy applied.
    pub async fn get_item(&self, descriptor: GetDescriptor) -> Result<Option<StoredItem>, KvError> {
        self.kv.get(descriptor).await
    }

    /// Submits one bounded transactional batch.
    pub async fn transact(&self, descriptors: Vec<WriteDescriptor>) -> Result<(), KvError> {
        self.kv.transact_write(descriptors).await
    }
}

fn map_read_error(err: KvError) -> crate::error::StorageError {
    crate::error::BackendError::internal("kv", err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use crate::kv::InMemoryKv;

    use super::*;

    fn item(storage_id: &str, vid: u64, status: DocumentStatus) -> StoredItem {
        StoredItem {
            storage_id: storage_id.to_string(),
            vid,
            resource_type: "Patient".to_string(),
            document_status: status,
            lock_end_ts: 0,
            tenant_id: None,
            references: BTreeSet::new(),
            document: json!({"resourceType": "Patient", "id": storage_id}),
        }
    }

    fn store() -> VersionStore {
        VersionStore::new(Arc::new(InMemoryKv::new()))
    }

    async fn seed(store: &VersionStore, items: Vec<StoredItem>) {
        for item in items {
            store.insert(params::insert_new_version(item)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_read_most_recent_prefers_head() {
        let store = store();
        seed(
            &store,
            vec![
                item("a", 1, DocumentStatus::Available),
                item("a", 2, DocumentStatus::Available),
            ],
        )
        .await;

        let current = store
            .read_most_recent_item("Patient", "a", None)
            .await
            .unwrap();
        assert_eq!(current.vid, 2);
    }

    #[tokio::test]
    async fn test_read_most_recent_pending_falls_back() {
        let store = store();
        seed(
            &store,
            vec![
                item("a", 1, DocumentStatus::Available),
                item("a", 2, DocumentStatus::Pending),
            ],
        )
        .await;

        let current = store
            .read_most_recent_item("Patient", "a", None)
            .await
            .unwrap();
        assert_eq!(current.vid, 1);
    }

    #[tokio::test]
    async fn test_read_most_recent_lone_pending_not_found() {
        let store = store();
        seed(&store, vec![item("a", 1, DocumentStatus::Pending)]).await;

        let err = store
            .read_most_recent_item("Patient", "a", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resource not found"));
    }

    #[tokio::test]
    async fn test_read_most_recent_deleted_not_found() {
        let store = store();
        seed(
            &store,
            vec![
                item("a", 1, DocumentStatus::Available),
                item("a", 2, DocumentStatus::Deleted),
            ],
        )
        .await;

        assert!(store
            .read_most_recent_item("Patient", "a", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_most_recent_filters_resource_type() {
        let store = store();
        seed(&store, vec![item("a", 1, DocumentStatus::Available)]).await;

        assert!(store
            .read_most_recent_item("Observation", "a", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_version_requires_available() {
        let store = store();
        seed(
            &store,
            vec![
                item("a", 1, DocumentStatus::Available),
                item("a", 2, DocumentStatus::Pending),
            ],
        )
        .await;

        assert!(store.read_version_item("Patient", "a", 1, None).await.is_ok());
        assert!(store.read_version_item("Patient", "a", 2, None).await.is_err());
        assert!(store.read_version_item("Patient", "a", 5, None).await.is_err());
    }

    #[tokio::test]
    async fn test_read_history_newest_first() {
        let store = store();
        seed(
            &store,
            vec![
                item("a", 1, DocumentStatus::Available),
                item("a", 2, DocumentStatus::Available),
                item("a", 3, DocumentStatus::Pending),
            ],
        )
        .await;

        let history = store
            .read_history_items("Patient", "a", 10, None)
            .await
            .unwrap();
        assert_eq!(
            history.iter().map(|item| item.vid).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }
}
