//! Single-resource CRUD.
//!
//! The data service enforces the per-resource version lifecycle. Creates
//! take the fast path (a conditional insert straight to AVAILABLE, since
//! the key is new); updates delegate to the bundle service as a
//! single-entry bundle so the PENDING -> AVAILABLE machinery is shared;
//! deletes are a guarded AVAILABLE -> DELETED transition on the current
//! version. No retries happen at this layer.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{self, ReadProjection};
use crate::config::CoreConfig;
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::params;
use crate::store::VersionStore;
use crate::types::{DocumentStatus, StoredItem};

use super::bundle::{BatchRequest, BundleOperation, BundleService};
use super::ResourceResult;

/// Single-resource CRUD over the version store.
pub struct DataService {
    store: Arc<VersionStore>,
    bundle: Arc<BundleService>,
    config: CoreConfig,
}

impl DataService {
    /// Creates a data service sharing the version store with the given
    /// bundle coordinator.
    pub fn new(store: Arc<VersionStore>, bundle: Arc<BundleService>, config: CoreConfig) -> Self {
        Self {
            store,
            bundle,
            config,
        }
    }

    /// Creates a new resource under a generated uuid id.
    pub async fn create_resource(
        &self,
        resource: &Value,
        resource_type: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        let id = Uuid::new_v4().to_string();
        self.create_resource_with_id(resource, resource_type, &id, tenant_id)
            .await
    }

    /// Creates a new resource under the supplied id.
    ///
    /// Inserts version 1 directly as AVAILABLE, conditional on the key being
    /// unused; a condition failure means the id is taken.
    pub async fn create_resource_with_id(
        &self,
        resource: &Value,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;

        let item = codec::encode_for_insert(
            resource,
            resource_type,
            id,
            1,
            DocumentStatus::Available,
            tenant_id,
        )?;

        match self.store.insert(params::insert_new_version(item.clone())).await {
            Ok(()) => Ok(self.to_result(&item)),
            Err(err) if err.is_condition_failure() => Err(ResourceError::invalid(
                "Resource creation failed, id matches an existing resource",
            )
            .into()),
            Err(err) => Err(BackendError::internal("kv", err.to_string()).into()),
        }
    }

    /// Returns the current version of a resource.
    pub async fn read_resource(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        let item = self
            .store
            .read_most_recent_item(resource_type, id, tenant_id)
            .await?;
        Ok(self.to_result(&item))
    }

    /// Returns one specific committed version of a resource.
    pub async fn read_version(
        &self,
        resource_type: &str,
        id: &str,
        vid: u64,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        let item = self
            .store
            .read_version_item(resource_type, id, vid, tenant_id)
            .await?;
        Ok(self.to_result(&item))
    }

    /// Returns up to `limit` most recent committed versions, newest first.
    pub async fn read_history(
        &self,
        resource_type: &str,
        id: &str,
        limit: usize,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<ResourceResult>> {
        self.config.assert_tenancy(tenant_id)?;
        let items = self
            .store
            .read_history_items(resource_type, id, limit, tenant_id)
            .await?;
        Ok(items.iter().map(|item| self.to_result(item)).collect())
    }

    /// Writes a new version of an existing resource.
    ///
    /// When the target is missing and update-as-create is enabled, the
    /// supplied id must be uuid-shaped and the call falls through to a
    /// create; otherwise the miss is surfaced.
    pub async fn update_resource(
        &self,
        resource: &Value,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;

        match self
            .store
            .read_most_recent_item(resource_type, id, tenant_id)
            .await
        {
            Ok(_) => {}
            Err(StorageError::Resource(ResourceError::NotFound { .. }))
                if self.config.update_create_supported =>
            {
                if Uuid::parse_str(id).is_err() {
                    return Err(ResourceError::invalid(format!(
                        "cannot create resource with user-supplied id {id}: not a valid uuid"
                    ))
                    .into());
                }
                debug!(resource_type, id, "update target missing, creating");
                return self
                    .create_resource_with_id(resource, resource_type, id, tenant_id)
                    .await;
            }
            Err(err) => return Err(err),
        }

        let responses = self
            .bundle
            .transact(vec![BatchRequest {
                operation: BundleOperation::Update,
                resource_type: resource_type.to_string(),
                id: Some(id.to_string()),
                resource: Some(resource.clone()),
                tenant_id: tenant_id.map(str::to_string),
            }])
            .await?;

        let response = responses
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::internal("bundle", "empty bundle response"))?;
        let resource = response
            .resource
            .ok_or_else(|| BackendError::internal("bundle", "update response missing resource"))?;
        Ok(ResourceResult {
            resource_type: response.resource_type,
            id: response.id,
            vid: response.vid.unwrap_or_default(),
            last_modified: response.last_modified,
            resource,
        })
    }

    /// Logically deletes the current version of a resource.
    ///
    /// Returns a message naming the resource type, id and deleted version.
    pub async fn delete_resource(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<String> {
        self.config.assert_tenancy(tenant_id)?;

        let current = self
            .store
            .read_most_recent_item(resource_type, id, tenant_id)
            .await?;
        let now_ms = Utc::now().timestamp_millis();

        match self
            .store
            .transition(params::transition(
                current.key(),
                resource_type,
                DocumentStatus::Available,
                DocumentStatus::Deleted,
                now_ms,
                self.config.lock_duration_ms,
            ))
            .await
        {
            Ok(_) => Ok(format!(
                "Successfully deleted resource {}/{} version {}",
                resource_type, id, current.vid
            )),
            Err(err) if err.is_condition_failure() => {
                Err(ResourceError::not_found(resource_type, id).into())
            }
            Err(err) => Err(BackendError::internal("kv", err.to_string()).into()),
        }
    }

    fn to_result(&self, item: &StoredItem) -> ResourceResult {
        let projection = ReadProjection {
            include_tenant_id: false,
        };
        ResourceResult {
            resource_type: item.resource_type.clone(),
            id: codec::split_storage_id(&item.storage_id, item.tenant_id.as_deref()).to_string(),
            vid: item.vid,
            last_modified: item.last_updated(),
            resource: codec::decode_for_read(item, Some(&projection)),
        }
    }
}
