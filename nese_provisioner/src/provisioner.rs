use nese_allocation::find_pending_allocations;
use nese_observability::ErrorKind;
use nese_resources::AllocationId;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    error::{AllocationStoreSnafu, Result},
    pipeline::Pipeline,
    steps::QuotaRefresh,
    worker::{JobQueue, RunHandle},
};

/// Entry points of the provisioner.
///
/// Provisioning runs are handed to the worker pool behind `queue`; quota
/// refreshes run on the calling task.
#[derive(Clone)]
pub struct Provisioner {
    pub(crate) pipeline: Pipeline,
    queue: JobQueue,
}

impl Provisioner {
    pub fn new(pipeline: Pipeline, queue: JobQueue) -> Self {
        Self { pipeline, queue }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Start provisioning runs.
    ///
    /// With an id, provisions that allocation. Without, provisions every
    /// allocation that has a bucket name but no secret key yet. Allocations
    /// that cannot start are skipped, unless the profile itself is invalid.
    pub async fn provision(&self, allocation_id: Option<AllocationId>) -> Result<Vec<RunHandle>> {
        let Some(allocation_id) = allocation_id else {
            return self.provision_pending().await;
        };

        let run = self.pipeline.start_run(allocation_id).await?;
        let handle = self.queue.submit(run).await?;
        Ok(vec![handle])
    }

    async fn provision_pending(&self) -> Result<Vec<RunHandle>> {
        let pending = find_pending_allocations(self.pipeline.store().as_ref())
            .await
            .context(AllocationStoreSnafu {
                operation: "find_pending_allocations",
            })?;

        info!(count = pending.len(), "provisioning pending allocations");

        let mut handles = Vec::with_capacity(pending.len());
        for allocation_id in pending {
            let run = match self.pipeline.start_run(allocation_id).await {
                Ok(run) => run,
                Err(err) if err.kind() == ErrorKind::Configuration => return Err(err),
                Err(err) => {
                    warn!(allocation = %allocation_id, error = %err, "skipping allocation");
                    continue;
                }
            };
            handles.push(self.queue.submit(run).await?);
        }

        Ok(handles)
    }

    /// Push the allocation's quota attribute to its bucket.
    pub async fn refresh_quota(&self, allocation_id: AllocationId) -> Result<QuotaRefresh> {
        self.pipeline.refresh_quota(allocation_id).await
    }

    /// Provision a newly activated allocation of the managed resource.
    ///
    /// Returns `None` for allocations of any other resource.
    pub async fn on_allocation_activated(
        &self,
        allocation_id: AllocationId,
    ) -> Result<Option<RunHandle>> {
        let allocation = self
            .pipeline
            .store()
            .get_allocation(allocation_id)
            .await
            .context(AllocationStoreSnafu {
                operation: "get_allocation",
            })?;

        let managed_resource = &self.pipeline.options().managed_resource;
        if !allocation.has_resource(managed_resource) {
            debug!(
                allocation = %allocation_id,
                resource = ?allocation.parent_resource(),
                "ignoring allocation of an unmanaged resource"
            );
            return Ok(None);
        }

        Ok(self.provision(Some(allocation_id)).await?.pop())
    }

    pub async fn on_allocation_quota_attribute_changed(
        &self,
        allocation_id: AllocationId,
    ) -> Result<QuotaRefresh> {
        self.refresh_quota(allocation_id).await
    }
}
