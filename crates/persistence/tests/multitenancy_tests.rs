//! Tenant isolation and tenancy-mode assertions.

mod common;

use common::{fixtures, TestContext};
use meridian_persistence::error::{StorageError, TenancyError};
use meridian_persistence::service::bundle::{BatchRequest, BundleOperation};
use meridian_persistence::types::ItemKey;

#[tokio::test]
async fn test_single_tenant_rejects_tenant_id() {
    let ctx = TestContext::new();
    let err = ctx
        .data
        .create_resource(&fixtures::patient(), "Patient", Some("acme"))
        .await
        .expect_err("tenantId must be rejected in single-tenant mode");
    assert!(matches!(
        err,
        StorageError::Tenancy(TenancyError::Mismatch { .. })
    ));
}

#[tokio::test]
async fn test_multi_tenant_requires_tenant_id() {
    let ctx = TestContext::multi_tenant();
    let err = ctx
        .data
        .create_resource(&fixtures::patient(), "Patient", None)
        .await
        .expect_err("missing tenantId must be rejected in multi-tenant mode");
    assert!(matches!(
        err,
        StorageError::Tenancy(TenancyError::Mismatch { .. })
    ));
}

#[tokio::test]
async fn test_tenants_share_logical_ids_without_collision() {
    let ctx = TestContext::multi_tenant();
    let id = "5e91f2a3-6a59-44c8-b61b-0f2b54cbace2";

    ctx.data
        .create_resource_with_id(
            &fixtures::patient_with_marker("acme"),
            "Patient",
            id,
            Some("acme"),
        )
        .await
        .expect("create under acme should succeed");
    ctx.data
        .create_resource_with_id(
            &fixtures::patient_with_marker("globex"),
            "Patient",
            id,
            Some("globex"),
        )
        .await
        .expect("same id under globex should not collide");

    let acme = ctx
        .data
        .read_resource("Patient", id, Some("acme"))
        .await
        .unwrap();
    let globex = ctx
        .data
        .read_resource("Patient", id, Some("globex"))
        .await
        .unwrap();
    assert_eq!(acme.resource["marker"], "acme");
    assert_eq!(globex.resource["marker"], "globex");

    // The decoded id is the logical id, not the composite one.
    assert_eq!(acme.id, id);
    assert_eq!(acme.resource["id"], id);
    assert!(acme.resource.get("tenantId").is_none());

    // Physically the two chains live under distinct partition keys.
    assert!(ctx
        .kv
        .raw_item(&ItemKey::new(format!("{id}acme"), 1))
        .is_some());
    assert!(ctx
        .kv
        .raw_item(&ItemKey::new(format!("{id}globex"), 1))
        .is_some());
}

#[tokio::test]
async fn test_cross_tenant_read_misses() {
    let ctx = TestContext::multi_tenant();
    let created = ctx
        .data
        .create_resource(&fixtures::patient(), "Patient", Some("acme"))
        .await
        .unwrap();

    assert!(ctx
        .data
        .read_resource("Patient", &created.id, Some("globex"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_bundle_asserts_tenancy_per_entry() {
    let ctx = TestContext::multi_tenant();
    let err = ctx
        .bundle
        .transact(vec![BatchRequest {
            operation: BundleOperation::Create,
            resource_type: "Patient".to_string(),
            id: None,
            resource: Some(fixtures::patient()),
            tenant_id: None,
        }])
        .await
        .expect_err("bundle entry without tenantId must be rejected");
    assert!(matches!(err, StorageError::Tenancy(_)));
}

#[tokio::test]
async fn test_tenant_scoped_bundle_roundtrip() {
    let ctx = TestContext::multi_tenant();
    let responses = ctx
        .bundle
        .transact(vec![BatchRequest {
            operation: BundleOperation::Create,
            resource_type: "Patient".to_string(),
            id: None,
            resource: Some(fixtures::patient_with_marker("bundled")),
            tenant_id: Some("acme".to_string()),
        }])
        .await
        .expect("tenant-scoped bundle should commit");

    let id = &responses[0].id;
    let read = ctx
        .data
        .read_resource("Patient", id, Some("acme"))
        .await
        .unwrap();
    assert_eq!(read.resource["marker"], "bundled");
    assert_eq!(&read.id, id);
}
