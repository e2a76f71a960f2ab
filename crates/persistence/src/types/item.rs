//! Stored item types.
//!
//! A [`StoredItem`] is the primary-table record for a single immutable
//! version of a logical resource. The opaque payload lives in `document`;
//! the control fields the core needs for its state machine and for the
//! search mirror are lifted into typed struct fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DocumentStatus;

/// Composite primary key of the primary table: partition `storageId`,
/// range `vid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    /// Partition-key value, `id` composed with the tenant in multi-tenant mode.
    #[serde(rename = "storageId")]
    pub storage_id: String,
    /// Version number, strictly increasing per chain.
    pub vid: u64,
}

impl ItemKey {
    /// Creates a key from its parts.
    pub fn new(storage_id: impl Into<String>, vid: u64) -> Self {
        Self {
            storage_id: storage_id.into(),
            vid,
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.storage_id, self.vid)
    }
}

/// A stored version of a logical resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    /// Partition-key value.
    #[serde(rename = "storageId")]
    pub storage_id: String,

    /// Version number.
    pub vid: u64,

    /// The resource type of the payload.
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    /// Lifecycle state of this version.
    #[serde(rename = "documentStatus")]
    pub document_status: DocumentStatus,

    /// Epoch millis after which a transient state may be forcibly reclaimed.
    #[serde(rename = "lockEndTs")]
    pub lock_end_ts: i64,

    /// Owning tenant; present iff multi-tenancy is enabled.
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Reference fingerprints extracted from the payload (see the codec).
    #[serde(rename = "_references")]
    pub references: BTreeSet<String>,

    /// The resource payload, including `id`, `meta` and, for hybrid types,
    /// `bulkDataLink`.
    pub document: Value,
}

impl StoredItem {
    /// Returns this item's primary key.
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.storage_id.clone(), self.vid)
    }

    /// Returns the `meta.lastUpdated` timestamp stamped at encode time.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.document
            .get("meta")
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Returns the blob-store key for offloaded payload fields, if any.
    pub fn bulk_data_link(&self) -> Option<&str> {
        self.document.get("bulkDataLink").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> StoredItem {
        StoredItem {
            storage_id: "abc".to_string(),
            vid: 3,
            resource_type: "Patient".to_string(),
            document_status: DocumentStatus::Available,
            lock_end_ts: 1_700_000_000_000,
            tenant_id: None,
            references: BTreeSet::new(),
            document: json!({
                "resourceType": "Patient",
                "id": "abc",
                "meta": {"versionId": "3", "lastUpdated": "2024-01-02T03:04:05Z"}
            }),
        }
    }

    #[test]
    fn test_key() {
        let key = item().key();
        assert_eq!(key.storage_id, "abc");
        assert_eq!(key.vid, 3);
        assert_eq!(key.to_string(), "abc/3");
    }

    #[test]
    fn test_last_updated() {
        let ts = item().last_updated().unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_bulk_data_link_absent() {
        assert!(item().bulk_data_link().is_none());
    }

    #[test]
    fn test_serde_field_names() {
        let json = serde_json::to_value(item()).unwrap();
        assert_eq!(json["storageId"], "abc");
        assert_eq!(json["documentStatus"], "AVAILABLE");
        assert!(json["_references"].is_array());
        assert!(json.get("tenantId").is_none());
    }
}
