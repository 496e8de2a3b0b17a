mod common;

use nese_backend::BackendOperation;
use nese_provisioner::{QUOTA_ADJUSTMENT_FAILED_SUBJECT, StepName};
use nese_resources::{
    AllocationId, AttributeName, AttributeValue, BucketName, EndpointFlavor, Quota,
};

use crate::common::{Harness, create_harness};

async fn provisioned(flavor: EndpointFlavor, quota: i64) -> Harness {
    let harness = create_harness(flavor);
    let id = harness.seed_allocation(1, "lab-data", Some(quota)).await;
    let summary = harness
        .pipeline
        .run(harness.pipeline.start_run(id).await.unwrap())
        .await;
    assert!(summary.is_success(), "{summary:?}");
    harness
}

fn lab_data() -> BucketName {
    BucketName::new("lab-data").unwrap()
}

#[tokio::test]
async fn test_quota_change_updates_bucket() {
    let harness = provisioned(EndpointFlavor::Minio, 10).await;
    let id = AllocationId::new(1);
    harness
        .store
        .set_attribute(id, AttributeName::Quota, AttributeValue::Int(20))
        .await
        .unwrap();

    let (provisioner, task, ct) = harness.start_provisioner();
    let refresh = provisioner
        .on_allocation_quota_attribute_changed(id)
        .await
        .expect("refresh");

    assert!(refresh.is_success());
    assert_eq!(refresh.bucket_name, Some(lab_data()));
    assert_eq!(refresh.quota, Some(Quota::from_terabytes(20)));
    assert_eq!(refresh.task.name, StepName::RefreshQuota);

    let bucket = harness.backend.bucket(&lab_data()).unwrap();
    assert_eq!(bucket.quota, Some(Quota::from_terabytes(20)));
    assert_eq!(bucket.tags["quota"], "20");
    assert_eq!(bucket.tags["pi"], "jdoe");
    assert!(harness.notifier.notifications().is_empty());

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_quota_failure_notifies() {
    let harness = provisioned(EndpointFlavor::Rgw, 10).await;
    harness
        .backend
        .fail_on(BackendOperation::SetQuota, "QuotaExceeded");

    let refresh = harness
        .pipeline
        .refresh_quota(AllocationId::new(1))
        .await
        .expect("refresh");

    assert!(!refresh.is_success());
    assert!(refresh.task.diagnostic().unwrap().contains("QuotaExceeded"));

    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].subject, QUOTA_ADJUSTMENT_FAILED_SUBJECT);
    assert_eq!(notifications[0].context["bucket_name"], "lab-data");
    assert_eq!(notifications[0].context["quota"], "10TB");
    assert_eq!(notifications[0].failed_steps[0].step, StepName::RefreshQuota);
}

#[tokio::test]
async fn test_quota_refresh_without_quota_attribute() {
    let harness = create_harness(EndpointFlavor::Minio);
    let id = harness.seed_allocation(1, "lab-data", None).await;

    let refresh = harness.pipeline.refresh_quota(id).await.expect("refresh");

    assert!(!refresh.is_success());
    assert_eq!(refresh.quota, None);
    assert_eq!(harness.backend.call_count(BackendOperation::SetQuota), 0);
    assert_eq!(harness.notifier.notifications().len(), 1);
}

#[tokio::test]
async fn test_sweep_refreshes_drifted_quota() {
    let harness = provisioned(EndpointFlavor::Minio, 10).await;
    harness
        .backend
        .set_recorded_quota(&lab_data(), Quota::from_terabytes(8));

    let (provisioner, task, ct) = harness.start_provisioner();
    let report = provisioner.reconcile_quota_sweep().await.expect("sweep");

    assert_eq!(report.checked, 1);
    assert_eq!(report.drifted, vec![AllocationId::new(1)]);
    assert_eq!(report.refresh_failures, 0);
    assert_eq!(harness.backend.call_count(BackendOperation::SetQuota), 2);
    assert_eq!(
        harness.backend.bucket(&lab_data()).unwrap().quota,
        Some(Quota::from_terabytes(10))
    );

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_sweep_leaves_matching_quota_alone() {
    let harness = provisioned(EndpointFlavor::Minio, 10).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    let report = provisioner.reconcile_quota_sweep().await.expect("sweep");

    assert_eq!(report.checked, 1);
    assert!(report.drifted.is_empty());
    assert_eq!(harness.backend.call_count(BackendOperation::SetQuota), 1);

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_sweep_skips_and_counts_errors() {
    let harness = provisioned(EndpointFlavor::Minio, 10).await;
    // No quota attribute.
    harness.seed_allocation(2, "lab-two", None).await;
    // Bucket never created on the backend.
    harness.seed_allocation(3, "lab-three", Some(4)).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    let report = provisioner.reconcile_quota_sweep().await.expect("sweep");

    assert_eq!(report.checked, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 1);
    assert!(report.drifted.is_empty());

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_sweep_skips_backend_without_quota_read() {
    let harness = provisioned(EndpointFlavor::Rgw, 10).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    let report = provisioner.reconcile_quota_sweep().await.expect("sweep");

    assert_eq!(report.checked, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.backend.call_count(BackendOperation::GetQuota), 0);

    ct.cancel();
    task.await.unwrap();
}
