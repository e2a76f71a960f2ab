//! Version reads and history.

mod common;

use common::{fixtures, TestContext};
use meridian_persistence::error::{ResourceError, StorageError};

async fn seed_three_versions(ctx: &TestContext) -> String {
    let created = ctx
        .data
        .create_resource(&fixtures::patient_with_marker("v1"), "Patient", None)
        .await
        .unwrap();
    for marker in ["v2", "v3"] {
        ctx.data
            .update_resource(
                &fixtures::patient_with_marker(marker),
                "Patient",
                &created.id,
                None,
            )
            .await
            .unwrap();
    }
    created.id
}

#[tokio::test]
async fn test_read_specific_version() {
    let ctx = TestContext::new();
    let id = seed_three_versions(&ctx).await;

    let second = ctx
        .data
        .read_version("Patient", &id, 2, None)
        .await
        .expect("vread should succeed");
    assert_eq!(second.vid, 2);
    assert_eq!(second.resource["meta"]["versionId"], "2");
    assert_eq!(second.resource["marker"], "v2");

    // Internal fields never leak.
    assert!(second.resource.get("vid").is_none());
    assert!(second.resource.get("documentStatus").is_none());
    assert!(second.resource.get("lockEndTs").is_none());
    assert!(second.resource.get("_references").is_none());
}

#[tokio::test]
async fn test_read_absent_version() {
    let ctx = TestContext::new();
    let id = seed_three_versions(&ctx).await;

    let err = ctx
        .data
        .read_version("Patient", &id, 5, None)
        .await
        .expect_err("missing version should fail");
    match err {
        StorageError::Resource(ResourceError::VersionNotFound { vid, .. }) => {
            assert_eq!(vid, 5);
        }
        other => panic!("expected VersionNotFound, got {other}"),
    }
}

#[tokio::test]
async fn test_read_version_checks_resource_type() {
    let ctx = TestContext::new();
    let id = seed_three_versions(&ctx).await;

    assert!(matches!(
        ctx.data
            .read_version("Observation", &id, 1, None)
            .await
            .expect_err("wrong type should fail"),
        StorageError::Resource(ResourceError::VersionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_prior_versions_stay_readable_after_update() {
    let ctx = TestContext::new();
    let id = seed_three_versions(&ctx).await;

    for vid in 1..=3u64 {
        let result = ctx.data.read_version("Patient", &id, vid, None).await;
        assert!(result.is_ok(), "version {vid} should stay readable");
    }
}

#[tokio::test]
async fn test_history_newest_first() {
    let ctx = TestContext::new();
    let id = seed_three_versions(&ctx).await;

    let history = ctx
        .data
        .read_history("Patient", &id, 10, None)
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|r| r.vid).collect::<Vec<_>>(),
        vec![3, 2, 1]
    );

    let limited = ctx.data.read_history("Patient", &id, 2, None).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].vid, 3);
}

#[tokio::test]
async fn test_deleted_version_not_vreadable() {
    let ctx = TestContext::new();
    let created = ctx
        .data
        .create_resource(&fixtures::patient(), "Patient", None)
        .await
        .unwrap();
    ctx.data
        .delete_resource("Patient", &created.id, None)
        .await
        .unwrap();

    // vid 1 flipped to DELETED; the vread policy only serves AVAILABLE.
    assert!(ctx
        .data
        .read_version("Patient", &created.id, 1, None)
        .await
        .is_err());
}
