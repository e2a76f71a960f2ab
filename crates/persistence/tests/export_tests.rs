//! Export-job admission and lifecycle.

mod common;

use common::TestContext;
use meridian_persistence::config::CoreConfig;
use meridian_persistence::error::{ExportError, ResourceError, StorageError};
use meridian_persistence::export::{ExportRequest, JobStatus};

fn request(user: &str) -> ExportRequest {
    ExportRequest {
        requester_user_id: user.to_string(),
        export_type: "system".to_string(),
        group_id: None,
        since: None,
        types: None,
        output_format: Some("application/fhir+ndjson".to_string()),
    }
}

#[tokio::test]
async fn test_initiate_and_get_status() {
    let ctx = TestContext::new();
    let job_id = ctx
        .exports
        .initiate_export(&request("u1"))
        .await
        .expect("admission should succeed");

    let status = ctx.exports.get_export_status(&job_id).await.unwrap();
    assert_eq!(status.job_status, JobStatus::InProgress);
    assert_eq!(status.export_type, "system");
    assert!(status.exported_file_urls.is_empty());
    assert!(status.error_array.is_empty());
    assert_eq!(status.error_message, "");
}

#[tokio::test]
async fn test_per_user_admission_cap() {
    let ctx = TestContext::new();
    ctx.exports.initiate_export(&request("u1")).await.unwrap();

    let err = ctx
        .exports
        .initiate_export(&request("u1"))
        .await
        .expect_err("second job for the same user must be rejected");
    assert!(matches!(
        err,
        StorageError::Export(ExportError::TooManyConcurrentRequests)
    ));

    // A canceling job still counts against the cap.
    let ctx = TestContext::new();
    let job_id = ctx.exports.initiate_export(&request("u1")).await.unwrap();
    ctx.exports.cancel_export(&job_id).await.unwrap();
    assert!(ctx.exports.initiate_export(&request("u1")).await.is_err());
}

#[tokio::test]
async fn test_system_wide_admission_cap() {
    let ctx = TestContext::new();
    ctx.exports.initiate_export(&request("u1")).await.unwrap();
    ctx.exports.initiate_export(&request("u2")).await.unwrap();

    let err = ctx
        .exports
        .initiate_export(&request("u3"))
        .await
        .expect_err("system cap of two must reject a third requester");
    assert!(matches!(
        err,
        StorageError::Export(ExportError::TooManyConcurrentRequests)
    ));
}

#[tokio::test]
async fn test_caps_are_configurable() {
    let ctx = TestContext::with_config(CoreConfig {
        max_system_concurrent_export: 3,
        ..Default::default()
    });
    ctx.exports.initiate_export(&request("u1")).await.unwrap();
    ctx.exports.initiate_export(&request("u2")).await.unwrap();
    ctx.exports.initiate_export(&request("u3")).await.unwrap();
    assert!(ctx.exports.initiate_export(&request("u4")).await.is_err());
}

#[tokio::test]
async fn test_completion_frees_the_caps() {
    let ctx = TestContext::new();
    let job_id = ctx.exports.initiate_export(&request("u1")).await.unwrap();
    ctx.exports
        .complete_export(&job_id, vec!["https://example.org/out/patients.ndjson".to_string()])
        .await
        .unwrap();

    let status = ctx.exports.get_export_status(&job_id).await.unwrap();
    assert_eq!(status.job_status, JobStatus::Completed);
    assert_eq!(
        status.exported_file_urls,
        vec!["https://example.org/out/patients.ndjson".to_string()]
    );

    // The requester may start again.
    ctx.exports
        .initiate_export(&request("u1"))
        .await
        .expect("caps freed after completion");
}

#[tokio::test]
async fn test_cancel_missing_job() {
    let ctx = TestContext::new();
    let err = ctx
        .exports
        .cancel_export("b7f0a0f3-4b8c-4a3f-a9f7-1c8f1f3b6f1d")
        .await
        .expect_err("missing job should not be cancellable");
    match err {
        StorageError::Resource(ResourceError::NotFound { resource_type, .. }) => {
            assert_eq!(resource_type, "$export");
        }
        other => panic!("expected NotFound, got {other}"),
    }
}

#[tokio::test]
async fn test_cancel_lifecycle() {
    let ctx = TestContext::new();
    let job_id = ctx.exports.initiate_export(&request("u1")).await.unwrap();

    ctx.exports.cancel_export(&job_id).await.unwrap();
    assert_eq!(
        ctx.exports.get_export_status(&job_id).await.unwrap().job_status,
        JobStatus::Canceling
    );

    // Canceling again is allowed; the state is unchanged.
    ctx.exports.cancel_export(&job_id).await.unwrap();

    ctx.exports.confirm_cancellation(&job_id).await.unwrap();
    assert_eq!(
        ctx.exports.get_export_status(&job_id).await.unwrap().job_status,
        JobStatus::Canceled
    );

    // Terminal jobs reject further cancellation.
    let err = ctx
        .exports
        .cancel_export(&job_id)
        .await
        .expect_err("canceled job is terminal");
    assert!(matches!(
        err,
        StorageError::Export(ExportError::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
async fn test_failure_records_message() {
    let ctx = TestContext::new();
    let job_id = ctx.exports.initiate_export(&request("u1")).await.unwrap();
    ctx.exports
        .fail_export(&job_id, "output bucket unreachable".to_string())
        .await
        .unwrap();

    let status = ctx.exports.get_export_status(&job_id).await.unwrap();
    assert_eq!(status.job_status, JobStatus::Failed);
    assert_eq!(status.error_message, "output bucket unreachable");

    // Completing a failed job is rejected.
    assert!(ctx.exports.complete_export(&job_id, vec![]).await.is_err());
}
