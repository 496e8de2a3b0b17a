mod common;

use std::time::Duration;

use futures::future::join_all;
use nese_allocation::AllocationStore;
use nese_backend::BackendOperation;
use nese_observability::ErrorKind;
use nese_provisioner::ProvisionerError;
use nese_resources::{
    Allocation, AllocationId, AttributeName, AttributeValue, EndpointFlavor, RawProfile,
};

use crate::common::create_harness;

#[tokio::test]
async fn test_provision_discovers_pending_allocations() {
    let harness = create_harness(EndpointFlavor::Rgw);
    let first = harness.seed_allocation(1, "lab-one", Some(2)).await;
    let second = harness.seed_allocation(2, "lab-two", Some(4)).await;
    let provisioned = harness.seed_allocation(3, "lab-three", Some(1)).await;
    harness
        .store
        .set_attribute(provisioned, AttributeName::SecretKey, AttributeValue::text("s"))
        .await
        .unwrap();

    let (provisioner, task, ct) = harness.start_provisioner();
    let handles = provisioner.provision(None).await.expect("provision");

    let mut allocations: Vec<_> = handles.iter().map(|h| h.allocation_id()).collect();
    allocations.sort();
    assert_eq!(allocations, vec![first, second]);

    for handle in handles {
        let summary = handle.wait().await.expect("run summary");
        assert!(summary.is_success(), "{summary:?}");
    }

    assert_eq!(harness.backend.bucket_count(), 2);
    assert!(harness.attribute(first, AttributeName::SecretKey).await.is_some());
    assert!(harness.attribute(second, AttributeName::SecretKey).await.is_some());
    assert_eq!(
        harness.attribute(provisioned, AttributeName::SecretKey).await,
        Some(AttributeValue::text("s"))
    );
    assert_eq!(harness.bus.group_count(), 0);

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_discovery_skips_allocations_that_cannot_start() {
    let harness = create_harness(EndpointFlavor::Minio);
    let good = harness.seed_allocation(1, "lab-one", Some(2)).await;
    harness.seed_allocation(2, "Not A Bucket!", Some(2)).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    let handles = provisioner.provision(None).await.expect("provision");

    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].allocation_id(), good);

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_configuration_error_fails_provision() {
    let harness = create_harness(EndpointFlavor::Rgw);
    harness.seed_allocation(1, "lab-one", Some(2)).await;
    harness
        .profiles
        .replace(RawProfile::new("ceph", "s3.example.org", "admin", "secret"));

    let (provisioner, task, ct) = harness.start_provisioner();
    let err = provisioner.provision(None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(harness.bus.group_count(), 0);
    assert_eq!(harness.backend.call_count(BackendOperation::CreateUser), 0);

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_runs_of_one_allocation() {
    let harness = create_harness(EndpointFlavor::Rgw);
    let id = harness.seed_allocation(1, "lab-data", Some(2)).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    let submitted = join_all((0..4).map(|_| provisioner.provision(Some(id)))).await;

    let mut summaries = Vec::new();
    for handles in submitted {
        for handle in handles.expect("provision") {
            summaries.push(handle.wait().await.expect("run summary"));
        }
    }

    assert_eq!(summaries.len(), 4);
    assert!(summaries.iter().all(|summary| summary.is_success()));
    assert_eq!(harness.backend.user_count(), 1);
    assert_eq!(harness.backend.bucket_count(), 1);

    let user = harness.backend.user("lab-data_datamanager").unwrap();
    assert_eq!(
        harness.attribute(id, AttributeName::SecretKey).await,
        Some(AttributeValue::text(user.secret_key))
    );

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_activation_filters_by_resource() {
    let harness = create_harness(EndpointFlavor::Rgw);
    let managed = harness.seed_allocation(1, "lab-data", Some(2)).await;
    let other = AllocationId::new(2);
    harness
        .store
        .insert_allocation(Allocation::new(other, "Cluster hours").with_resource("HPC"))
        .await;
    harness
        .store
        .set_attribute(other, AttributeName::BucketName, AttributeValue::text("hpc"))
        .await
        .unwrap();

    let (provisioner, task, ct) = harness.start_provisioner();

    assert!(
        provisioner
            .on_allocation_activated(other)
            .await
            .unwrap()
            .is_none()
    );

    let handle = provisioner
        .on_allocation_activated(managed)
        .await
        .unwrap()
        .expect("managed allocation is provisioned");
    assert!(handle.wait().await.unwrap().is_success());
    assert_eq!(harness.backend.bucket_count(), 1);

    ct.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_stopped_pool_rejects_runs() {
    let harness = create_harness(EndpointFlavor::Rgw);
    let id = harness.seed_allocation(1, "lab-data", Some(2)).await;

    let (provisioner, task, ct) = harness.start_provisioner();
    ct.cancel();
    task.await.unwrap();

    let err = provisioner.provision(Some(id)).await.unwrap_err();
    assert!(matches!(err, ProvisionerError::WorkerPoolClosed));
    assert_eq!(err.kind(), ErrorKind::Temporary);
    assert!(harness.store.get_allocation(id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_pool_finishes_running_step() {
    let harness = create_harness(EndpointFlavor::Rgw);
    let id = harness.seed_allocation(1, "lab-data", Some(2)).await;
    harness
        .backend
        .delay_on(BackendOperation::CreateBucket, Duration::from_secs(2));

    let (provisioner, task, ct) = harness.start_provisioner();
    let handle = provisioner
        .provision(Some(id))
        .await
        .expect("provision")
        .pop()
        .expect("run handle");
    let group = handle.group();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.backend.call_count(BackendOperation::CreateBucket), 1);

    ct.cancel();
    task.await.unwrap();

    // The bucket step ran to its end, finalize never started.
    assert_eq!(harness.backend.call_count(BackendOperation::SetQuota), 1);
    assert_eq!(harness.backend.bucket_count(), 1);
    assert!(harness.attribute(id, AttributeName::SecretKey).await.is_none());

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ProvisionerError::RunAbandoned { .. }));
    assert!(!harness.bus.contains(group));
    assert_eq!(harness.bus.group_count(), 0);
}
