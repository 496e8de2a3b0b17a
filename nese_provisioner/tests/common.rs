#![allow(dead_code)]

use std::sync::Arc;

use nese_allocation::{AllocationStore, InMemoryAllocationStore};
use nese_backend::{BackendRegistry, InMemoryBackend};
use nese_provisioner::{
    InMemoryNotifier, InMemoryTaskGroupBus, Pipeline, PipelineOptions, Provisioner,
    StaticProfileSource, WorkerPoolOptions, run_worker_pool, worker_pool,
};
use nese_resources::{
    Allocation, AllocationId, AttributeName, AttributeValue, EndpointFlavor, RawProfile,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MANAGED_RESOURCE: &str = "NESE S3 Allocation";

pub struct Harness {
    pub store: Arc<InMemoryAllocationStore>,
    pub backend: Arc<InMemoryBackend>,
    pub bus: Arc<InMemoryTaskGroupBus>,
    pub notifier: Arc<InMemoryNotifier>,
    pub profiles: Arc<StaticProfileSource>,
    pub pipeline: Pipeline,
}

pub fn raw_profile(flavor: EndpointFlavor) -> RawProfile {
    let raw = RawProfile::new(flavor.to_string(), "s3.example.org", "admin", "admin-secret");
    match flavor {
        EndpointFlavor::Rgw => raw.with_uid("nese-owner"),
        EndpointFlavor::Minio => raw,
    }
}

pub fn create_harness(flavor: EndpointFlavor) -> Harness {
    create_harness_with_options(flavor, PipelineOptions::default())
}

pub fn create_harness_with_options(flavor: EndpointFlavor, options: PipelineOptions) -> Harness {
    let store = Arc::new(InMemoryAllocationStore::new());
    let backend = Arc::new(InMemoryBackend::new(flavor));
    let bus = Arc::new(InMemoryTaskGroupBus::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let profiles = Arc::new(StaticProfileSource::new(raw_profile(flavor)));

    let pipeline = Pipeline::new(
        store.clone(),
        BackendRegistry::new().with_backend(backend.clone()),
        bus.clone(),
        notifier.clone(),
        profiles.clone(),
        options,
    );

    Harness {
        store,
        backend,
        bus,
        notifier,
        profiles,
        pipeline,
    }
}

impl Harness {
    /// Start a worker pool and return the provisioner feeding it.
    pub fn start_provisioner(&self) -> (Provisioner, JoinHandle<()>, CancellationToken) {
        let (queue, pool) = worker_pool(self.pipeline.clone(), WorkerPoolOptions::default());
        let ct = CancellationToken::new();
        let task = tokio::spawn(run_worker_pool(pool, ct.clone()));
        (Provisioner::new(self.pipeline.clone(), queue), task, ct)
    }

    /// Insert an allocation of the managed resource asking for `bucket`.
    pub async fn seed_allocation(&self, id: u64, bucket: &str, quota: Option<i64>) -> AllocationId {
        let allocation_id = AllocationId::new(id);
        self.store
            .insert_allocation(
                Allocation::new(allocation_id, format!("Allocation {id}"))
                    .with_project("Genomics", "jdoe")
                    .with_resource(MANAGED_RESOURCE)
                    .with_quantity(1),
            )
            .await;
        self.store
            .set_attribute(
                allocation_id,
                AttributeName::BucketName,
                AttributeValue::text(bucket),
            )
            .await
            .expect("set bucket_name");
        if let Some(quota) = quota {
            self.store
                .set_attribute(allocation_id, AttributeName::Quota, AttributeValue::Int(quota))
                .await
                .expect("set quota");
        }
        allocation_id
    }

    pub async fn attribute(&self, id: AllocationId, name: AttributeName) -> Option<AttributeValue> {
        self.store.get_attribute(id, name).await.expect("get_attribute")
    }
}
