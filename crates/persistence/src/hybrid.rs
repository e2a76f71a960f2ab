//! Transparent offload of large payload fields to the blob store.
//!
//! Resource types registered at construction get their oversized fields
//! detached into a blob object before the stripped stub reaches the primary
//! table, and spliced back on read. Write ordering is strict: the blob is
//! uploaded first so that a crash can only leave an orphaned blob, never an
//! unreadable resource.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::blob::BlobApi;
use crate::config::CoreConfig;
use crate::error::{ResourceError, StorageResult};
use crate::params::fields;
use crate::service::data::DataService;
use crate::service::ResourceResult;

/// Body of a blob-store object holding offloaded fields.
///
/// `link` repeats the object's own key; readers verify it before splicing
/// `data` back, so a blob copied or renamed out of place is never trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkObject {
    /// The object's own blob key.
    pub link: String,
    /// Offloaded field values, keyed by field name.
    pub data: Map<String, Value>,
}

/// Immutable offload registration, populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct OffloadRegistry {
    fields_by_type: HashMap<String, Vec<String>>,
}

impl OffloadRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the offloaded fields of a resource type. Builder-style so
    /// the finished registry can be handed to the store and never mutated.
    pub fn register(
        mut self,
        resource_type: impl Into<String>,
        field_names: Vec<String>,
    ) -> Self {
        self.fields_by_type.insert(resource_type.into(), field_names);
        self
    }

    /// Returns the offloaded fields of a resource type, if registered.
    pub fn fields_for(&self, resource_type: &str) -> Option<&[String]> {
        self.fields_by_type.get(resource_type).map(Vec::as_slice)
    }
}

/// Data service wrapper that detaches and reattaches offloaded fields.
pub struct HybridStore {
    data: Arc<DataService>,
    blob: Arc<dyn BlobApi>,
    registry: OffloadRegistry,
    config: CoreConfig,
}

impl HybridStore {
    /// Creates a hybrid store over the data service and blob engine.
    pub fn new(
        data: Arc<DataService>,
        blob: Arc<dyn BlobApi>,
        registry: OffloadRegistry,
        config: CoreConfig,
    ) -> Self {
        Self {
            data,
            blob,
            registry,
            config,
        }
    }

    /// Creates a resource, offloading registered fields first.
    pub async fn create_resource(
        &self,
        resource: &Value,
        resource_type: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        let id = Uuid::new_v4().to_string();
        self.write(resource, resource_type, &id, tenant_id, WriteKind::Create)
            .await
    }

    /// Writes a new version of a resource, offloading registered fields first.
    pub async fn update_resource(
        &self,
        resource: &Value,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        self.write(resource, resource_type, id, tenant_id, WriteKind::Update)
            .await
    }

    /// Returns the current version with offloaded fields spliced back.
    pub async fn read_resource(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        let result = self.data.read_resource(resource_type, id, tenant_id).await?;
        self.compose(result).await
    }

    /// Returns one committed version with offloaded fields spliced back.
    pub async fn read_version(
        &self,
        resource_type: &str,
        id: &str,
        vid: u64,
        tenant_id: Option<&str>,
    ) -> StorageResult<ResourceResult> {
        self.config.assert_tenancy(tenant_id)?;
        let result = self
            .data
            .read_version(resource_type, id, vid, tenant_id)
            .await?;
        self.compose(result).await
    }

    /// Logically deletes the current version, dropping its blob in parallel.
    ///
    /// The blob delete is best effort: a failure there orphans an object the
    /// garbage collector can reclaim, while a primary-table failure is
    /// surfaced.
    pub async fn delete_resource(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<String> {
        self.config.assert_tenancy(tenant_id)?;
        let current = self.data.read_resource(resource_type, id, tenant_id).await?;
        let link = current
            .resource
            .get(fields::BULK_DATA_LINK)
            .and_then(Value::as_str)
            .map(str::to_string);

        let blob_delete = async {
            if let Some(link) = &link {
                if let Err(err) = self.blob.delete(link).await {
                    warn!(link, error = %err, "failed to delete offloaded blob");
                }
            }
        };
        let (_, deleted) = tokio::join!(
            blob_delete,
            self.data.delete_resource(resource_type, id, tenant_id)
        );
        deleted
    }

    /// Removes every blob generation of a resource.
    ///
    /// The explicit cleanup path for a resource whose chain has been
    /// deleted; retention of superseded blobs is otherwise left to GC.
    pub async fn purge_blobs(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> StorageResult<usize> {
        self.config.assert_tenancy(tenant_id)?;
        let prefix = self.bulk_key_prefix(resource_type, id, tenant_id);
        self.blob
            .delete_prefix(&prefix)
            .await
            .map_err(|err| crate::error::BackendError::internal("blob", err.to_string()).into())
    }

    async fn write(
        &self,
        resource: &Value,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
        kind: WriteKind,
    ) -> StorageResult<ResourceResult> {
        let Some(field_names) = self.registry.fields_for(resource_type) else {
            return self.passthrough(resource, resource_type, id, tenant_id, kind).await;
        };

        let Some(source) = resource.as_object() else {
            return Err(ResourceError::invalid("resource payload must be a JSON object").into());
        };

        let mut stripped = source.clone();
        let mut detached = Map::new();
        for field in field_names {
            if let Some(value) = stripped.remove(field) {
                detached.insert(field.clone(), value);
            }
        }
        if detached.is_empty() {
            return self.passthrough(resource, resource_type, id, tenant_id, kind).await;
        }

        let link = self.fresh_bulk_key(resource_type, id, tenant_id);
        let body = serde_json::to_vec(&BulkObject {
            link: link.clone(),
            data: detached.clone(),
        })?;

        // Blob first: a crash here leaves only an orphaned object.
        self.blob
            .put(&link, body)
            .await
            .map_err(|err| crate::error::BackendError::internal("blob", err.to_string()))?;

        stripped.insert(
            fields::BULK_DATA_LINK.to_string(),
            Value::String(link.clone()),
        );
        let stub = Value::Object(stripped);

        let written = match kind {
            WriteKind::Create => {
                self.data
                    .create_resource_with_id(&stub, resource_type, id, tenant_id)
                    .await
            }
            WriteKind::Update => {
                self.data
                    .update_resource(&stub, resource_type, id, tenant_id)
                    .await
            }
        };

        let mut result = match written {
            Ok(result) => result,
            Err(err) => {
                if let Err(cleanup) = self.blob.delete(&link).await {
                    warn!(link, error = %cleanup, "failed to clean up blob after write failure");
                }
                return Err(err);
            }
        };

        // The caller gets the full resource back.
        if let Some(object) = result.resource.as_object_mut() {
            object.remove(fields::BULK_DATA_LINK);
            for (field, value) in detached {
                object.insert(field, value);
            }
        }
        Ok(result)
    }

    async fn passthrough(
        &self,
        resource: &Value,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&str>,
        kind: WriteKind,
    ) -> StorageResult<ResourceResult> {
        match kind {
            WriteKind::Create => {
                self.data
                    .create_resource_with_id(resource, resource_type, id, tenant_id)
                    .await
            }
            WriteKind::Update => {
                self.data
                    .update_resource(resource, resource_type, id, tenant_id)
                    .await
            }
        }
    }

    /// Splices offloaded fields back onto a read result.
    ///
    /// Any blob miss, unparsable body, or link mismatch is surfaced as
    /// ResourceNotFound; the stripped stub is never returned.
    async fn compose(&self, mut result: ResourceResult) -> StorageResult<ResourceResult> {
        let Some(link) = result
            .resource
            .get(fields::BULK_DATA_LINK)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(result);
        };

        let not_found =
            || ResourceError::not_found(result.resource_type.clone(), result.id.clone());

        let body = self
            .blob
            .get(&link)
            .await
            .map_err(|err| {
                warn!(link, error = %err, "blob fetch failed while composing hybrid resource");
                not_found()
            })?
            .ok_or_else(not_found)?;

        let bulk: BulkObject = parse_bulk_object(&body).ok_or_else(not_found)?;
        if bulk.link != link {
            warn!(link, stored = bulk.link, "bulk object link mismatch");
            return Err(not_found().into());
        }

        if let Some(object) = result.resource.as_object_mut() {
            object.remove(fields::BULK_DATA_LINK);
            for (field, value) in bulk.data {
                object.insert(field, value);
            }
        }
        Ok(result)
    }

    fn fresh_bulk_key(&self, resource_type: &str, id: &str, tenant_id: Option<&str>) -> String {
        format!(
            "{}{}.json",
            self.bulk_key_prefix(resource_type, id, tenant_id),
            Uuid::new_v4()
        )
    }

    fn bulk_key_prefix(&self, resource_type: &str, id: &str, tenant_id: Option<&str>) -> String {
        let tenant_prefix = tenant_id
            .map(|tenant| format!("{tenant}/"))
            .unwrap_or_default();
        format!(
            "{tenant_prefix}{resource_type}/{id}{}",
            self.config.bulk_key_separator
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Create,
    Update,
}

/// Parses a bulk object body, accepting raw UTF-8 JSON or the
/// base64-wrapped transport form.
fn parse_bulk_object(body: &[u8]) -> Option<BulkObject> {
    if let Ok(bulk) = serde_json::from_slice::<BulkObject>(body) {
        return Some(bulk);
    }
    let text = std::str::from_utf8(body).ok()?;
    let decoded = BASE64.decode(text.trim()).ok()?;
    serde_json::from_slice(&decoded).ok()
}
