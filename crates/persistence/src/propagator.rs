//! Change-feed consumer that mirrors the primary table into the search
//! index.
//!
//! The propagator keeps no state between invocations; per-shard feed order
//! is the only input it needs. Each invocation batches its index operations
//! and executes them once; on any error the offending ids are logged and
//! the error is re-raised so the feed redelivers the batch. Replaying a
//! record any number of times converges the index to the same state.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error};

use crate::codec;
use crate::config::CoreConfig;
use crate::error::{BackendError, StorageResult};
use crate::index::{IndexError, IndexOp, SearchApi};
use crate::kv::{ChangeEvent, ChangeRecord};
use crate::params::fields;
use crate::types::{DocumentStatus, StoredItem};

/// Binary payloads are not mirrored.
const BINARY_RESOURCE_TYPE: &str = "Binary";

/// Returns the stable alias for a resource type's index.
pub fn alias_for(resource_type: &str) -> String {
    format!("{}-alias", resource_type.to_lowercase())
}

/// Mirrors change-feed records into per-resource-type search indices.
pub struct ChangePropagator {
    search: Arc<dyn SearchApi>,
    multi_tenancy: bool,
}

impl ChangePropagator {
    /// Creates a propagator over the given index engine.
    pub fn new(search: Arc<dyn SearchApi>, config: &CoreConfig) -> Self {
        Self {
            search,
            multi_tenancy: config.enable_multi_tenancy,
        }
    }

    /// Processes one feed invocation's worth of records.
    pub async fn process(&self, records: &[ChangeRecord]) -> StorageResult<()> {
        let mut ensured: HashSet<String> = HashSet::new();
        let mut operations: Vec<IndexOp> = Vec::new();

        for record in records {
            let Some(image) = record.image() else {
                continue;
            };
            if image.resource_type == BINARY_RESOURCE_TYPE {
                continue;
            }

            let alias = alias_for(&image.resource_type);
            if ensured.insert(alias.clone()) {
                self.ensure_alias(&image.resource_type, &alias).await?;
            }

            match record.event {
                ChangeEvent::Remove => operations.push(IndexOp::Delete {
                    alias,
                    id: image.storage_id.clone(),
                }),
                ChangeEvent::Insert | ChangeEvent::Modify => match image.document_status {
                    DocumentStatus::Available => operations.push(IndexOp::Upsert {
                        alias,
                        id: image.storage_id.clone(),
                        document: self.to_search_document(image),
                    }),
                    DocumentStatus::Deleted => operations.push(IndexOp::Delete {
                        alias,
                        id: image.storage_id.clone(),
                    }),
                    // Transient states are never indexed.
                    DocumentStatus::Pending
                    | DocumentStatus::Locked
                    | DocumentStatus::PendingDelete => {}
                },
            }
        }

        if operations.is_empty() {
            return Ok(());
        }

        debug!(count = operations.len(), "executing index operations");
        match self.search.bulk(operations).await {
            Ok(()) => Ok(()),
            Err(IndexError::BulkFailed { ids }) => {
                error!(?ids, "search index rejected documents; batch will redeliver");
                Err(BackendError::internal(
                    "search",
                    format!("bulk execution failed for ids {ids:?}"),
                )
                .into())
            }
            Err(err) => {
                error!(error = %err, "search index call failed; batch will redeliver");
                Err(BackendError::internal("search", err.to_string()).into())
            }
        }
    }

    /// Makes sure the resource type's physical index exists and carries the
    /// stable alias. An existing index without the alias is aliased as-is,
    /// which lets a reindex swap physical indices with no writer changes.
    async fn ensure_alias(&self, resource_type: &str, alias: &str) -> StorageResult<()> {
        let map_err =
            |err: IndexError| BackendError::internal("search", err.to_string());

        if self.search.alias_exists(alias).await.map_err(map_err)? {
            return Ok(());
        }

        let index = resource_type.to_lowercase();
        if !self.search.index_exists(&index).await.map_err(map_err)? {
            self.search
                .create_index(&index, self.index_mapping())
                .await
                .map_err(map_err)?;
        }
        self.search
            .attach_alias(&index, alias)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    fn index_mapping(&self) -> Value {
        let mut properties = json!({
            "id": { "type": "keyword" },
            "resourceType": { "type": "keyword" },
            "documentStatus": { "type": "keyword" },
            "_references": { "type": "keyword" },
        });
        if self.multi_tenancy {
            properties[fields::TENANT_ID] = json!({ "type": "keyword" });
        }
        json!({ "mappings": { "properties": properties } })
    }

    /// Builds the search document for one item: the payload with the id
    /// normalised back to the logical id, plus the indexed control fields.
    fn to_search_document(&self, item: &StoredItem) -> Value {
        let mut document = item.document.clone();
        if let Some(object) = document.as_object_mut() {
            let logical_id =
                codec::split_storage_id(&item.storage_id, item.tenant_id.as_deref());
            object.insert(fields::ID.to_string(), Value::String(logical_id.to_string()));
            object.insert(
                fields::DOCUMENT_STATUS.to_string(),
                Value::String(item.document_status.as_str().to_string()),
            );
            object.insert(fields::VID.to_string(), json!(item.vid));
            object.insert(
                fields::REFERENCES.to_string(),
                Value::Array(
                    item.references
                        .iter()
                        .map(|r| Value::String(r.clone()))
                        .collect(),
                ),
            );
            if let Some(tenant) = &item.tenant_id {
                object.insert(fields::TENANT_ID.to_string(), Value::String(tenant.clone()));
            }
        }
        document
    }
}
