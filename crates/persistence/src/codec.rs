//! Translation between logical resources and stored items.
//!
//! The codec is the only place that knows how internal fields are injected
//! into and stripped from resource payloads, and how the tenant is folded
//! into the partition key. Swapping the composite-id encoding for a native
//! two-column partition scheme would touch this module alone.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{ResourceError, StorageResult};
use crate::params::fields;
use crate::types::{DocumentStatus, StoredItem};

/// Projection options for [`decode_for_read`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadProjection {
    /// Carry the owning tenant into the decoded resource.
    pub include_tenant_id: bool,
}

/// Composes the physical partition-key value from the logical id and the
/// tenant. Single-tenant mode stores the id verbatim.
pub fn build_storage_id(id: &str, tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant) => format!("{}{}", id, tenant),
        None => id.to_string(),
    }
}

/// Splits a storage id back to the logical id by stripping the known tenant
/// suffix.
pub fn split_storage_id<'a>(storage_id: &'a str, tenant_id: Option<&str>) -> &'a str {
    match tenant_id {
        Some(tenant) => storage_id.strip_suffix(tenant).unwrap_or(storage_id),
        None => storage_id,
    }
}

/// Collects every string value stored under an object key named
/// `reference`, at any depth.
///
/// This matches dotted-path flattening: a path terminates in `reference`
/// exactly when a string sits directly under that object key. Strings
/// inside an array named `reference` flatten to paths ending in the array
/// index and are not collected.
pub fn extract_references(resource: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references(resource, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if key == "reference" => {
                        out.insert(s.clone());
                    }
                    _ => collect_references(child, out),
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_references(child, out);
            }
        }
        _ => {}
    }
}

/// Encodes a logical resource as the stored item for version `vid`.
///
/// Clones the payload, rewrites `id` to the storage id, overwrites
/// `meta.versionId` and `meta.lastUpdated` regardless of caller-supplied
/// values, stamps `lockEndTs` with the current time, and computes the
/// reference fingerprints.
pub fn encode_for_insert(
    resource: &Value,
    resource_type: &str,
    id: &str,
    vid: u64,
    status: DocumentStatus,
    tenant_id: Option<&str>,
) -> StorageResult<StoredItem> {
    let Some(source) = resource.as_object() else {
        return Err(ResourceError::invalid("resource payload must be a JSON object").into());
    };

    let now = Utc::now();
    let storage_id = build_storage_id(id, tenant_id);
    let references = extract_references(resource);

    let mut document = source.clone();
    strip_internal_fields(&mut document);
    document.insert(
        fields::ID.to_string(),
        Value::String(storage_id.clone()),
    );
    document.insert(
        fields::RESOURCE_TYPE.to_string(),
        Value::String(resource_type.to_string()),
    );

    let meta = document
        .entry(fields::META.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    let meta = meta.as_object_mut().expect("meta is an object");
    meta.insert(
        fields::META_VERSION_ID.to_string(),
        Value::String(vid.to_string()),
    );
    meta.insert(
        fields::META_LAST_UPDATED.to_string(),
        Value::String(now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );

    Ok(StoredItem {
        storage_id,
        vid,
        resource_type: resource_type.to_string(),
        document_status: status,
        lock_end_ts: now.timestamp_millis(),
        tenant_id: tenant_id.map(str::to_string),
        references,
        document: Value::Object(document),
    })
}

/// Decodes a stored item back to the caller-facing resource.
///
/// Strips internal fields, splits the tenant back out of the storage id,
/// and carries `tenantId` only when the projection asks for it. The
/// `bulkDataLink` stub is left in place; the hybrid store owns it.
pub fn decode_for_read(item: &StoredItem, projection: Option<&ReadProjection>) -> Value {
    let mut document = match item.document.as_object() {
        Some(map) => map.clone(),
        None => return item.document.clone(),
    };

    strip_internal_fields(&mut document);
    document.remove(fields::TENANT_ID);

    let logical_id = split_storage_id(&item.storage_id, item.tenant_id.as_deref());
    document.insert(fields::ID.to_string(), Value::String(logical_id.to_string()));

    if projection.is_some_and(|p| p.include_tenant_id) {
        if let Some(tenant) = &item.tenant_id {
            document.insert(fields::TENANT_ID.to_string(), Value::String(tenant.clone()));
        }
    }

    Value::Object(document)
}

fn strip_internal_fields(document: &mut Map<String, Value>) {
    document.remove(fields::DOCUMENT_STATUS);
    document.remove(fields::LOCK_END_TS);
    document.remove(fields::VID);
    document.remove(fields::REFERENCES);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_storage_id_roundtrip() {
        assert_eq!(build_storage_id("abc", None), "abc");
        assert_eq!(build_storage_id("abc", Some("t1")), "abct1");
        assert_eq!(split_storage_id("abct1", Some("t1")), "abc");
        assert_eq!(split_storage_id("abc", None), "abc");
        // Unknown suffix falls back to the raw value.
        assert_eq!(split_storage_id("abc", Some("zz")), "abc");
    }

    #[test]
    fn test_extract_references_nested() {
        let resource = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/1"},
            "performer": [
                {"reference": "Practitioner/2"},
                {"actor": {"reference": "Organization/3"}}
            ],
            "note": "reference",
            "component": {"reference": 42}
        });
        let refs = extract_references(&resource);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["Organization/3", "Patient/1", "Practitioner/2"]
        );
    }

    #[test]
    fn test_extract_references_skips_arrays_of_strings() {
        let resource = json!({"reference": ["Patient/1", "Patient/2"]});
        assert!(extract_references(&resource).is_empty());
    }

    #[test]
    fn test_encode_stamps_meta_and_lock() {
        let resource = json!({
            "resourceType": "Patient",
            "meta": {"versionId": "999", "lastUpdated": "1970-01-01T00:00:00Z", "source": "x"},
            "name": [{"family": "Jameson"}]
        });
        let item = encode_for_insert(
            &resource,
            "Patient",
            "id-1",
            4,
            DocumentStatus::Pending,
            None,
        )
        .unwrap();

        assert_eq!(item.storage_id, "id-1");
        assert_eq!(item.vid, 4);
        assert_eq!(item.document_status, DocumentStatus::Pending);
        assert!(item.lock_end_ts > 0);
        assert_eq!(item.document["meta"]["versionId"], "4");
        assert_ne!(item.document["meta"]["lastUpdated"], "1970-01-01T00:00:00Z");
        // Caller-supplied meta fields other than the stamped pair survive.
        assert_eq!(item.document["meta"]["source"], "x");
        assert_eq!(item.document["id"], "id-1");
    }

    #[test]
    fn test_encode_multi_tenant_composes_id() {
        let resource = json!({"resourceType": "Patient"});
        let item = encode_for_insert(
            &resource,
            "Patient",
            "id-1",
            1,
            DocumentStatus::Available,
            Some("acme"),
        )
        .unwrap();
        assert_eq!(item.storage_id, "id-1acme");
        assert_eq!(item.document["id"], "id-1acme");
        assert_eq!(item.tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_encode_rejects_non_object() {
        let err = encode_for_insert(
            &json!("scalar"),
            "Patient",
            "id",
            1,
            DocumentStatus::Available,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid resource"));
    }

    #[test]
    fn test_decode_strips_and_splits() {
        let resource = json!({
            "resourceType": "Patient",
            "documentStatus": "SHOULD_GO",
            "name": [{"family": "Jameson", "given": ["Matt"]}]
        });
        let item = encode_for_insert(
            &resource,
            "Patient",
            "id-1",
            1,
            DocumentStatus::Available,
            Some("acme"),
        )
        .unwrap();

        let decoded = decode_for_read(&item, None);
        assert_eq!(decoded["id"], "id-1");
        assert!(decoded.get("documentStatus").is_none());
        assert!(decoded.get("lockEndTs").is_none());
        assert!(decoded.get("vid").is_none());
        assert!(decoded.get("_references").is_none());
        assert!(decoded.get("tenantId").is_none());

        let projected = decode_for_read(
            &item,
            Some(&ReadProjection {
                include_tenant_id: true,
            }),
        );
        assert_eq!(projected["tenantId"], "acme");
    }

    #[test]
    fn test_roundtrip_preserves_payload() {
        let resource = json!({
            "resourceType": "Patient",
            "active": true,
            "name": [{"family": "Jameson", "given": ["Matt"]}],
            "link": {"other": {"reference": "Patient/x"}}
        });
        let item = encode_for_insert(
            &resource,
            "Patient",
            "id-1",
            1,
            DocumentStatus::Available,
            None,
        )
        .unwrap();
        let mut decoded = decode_for_read(&item, None);

        // Equal except for the system-stamped fields.
        let object = decoded.as_object_mut().unwrap();
        object.remove("meta");
        object.remove("id");
        assert_eq!(
            Value::Object(object.clone()),
            json!({
                "resourceType": "Patient",
                "active": true,
                "name": [{"family": "Jameson", "given": ["Matt"]}],
                "link": {"other": {"reference": "Patient/x"}}
            })
        );
    }
}
