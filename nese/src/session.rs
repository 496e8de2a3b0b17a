use std::sync::Arc;

use nese_allocation::InMemoryAllocationStore;
use nese_backend::BackendRegistry;
use nese_provisioner::{Provisioner, run_worker_pool, worker_pool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    args::{PipelineArgs, ProfileArgs, http_client, new_pipeline},
    error::Result,
};

/// A provisioner with its worker pool running in the background.
pub struct Session {
    pub store: Arc<InMemoryAllocationStore>,
    pub provisioner: Provisioner,
    args: PipelineArgs,
    pool_task: JoinHandle<()>,
    ct: CancellationToken,
}

impl Session {
    /// Start a session against the real storage endpoints.
    pub async fn start(
        profile: &ProfileArgs,
        args: &PipelineArgs,
        ct: &CancellationToken,
    ) -> Result<Self> {
        let client = http_client()?;
        let store = args.store().await?;
        let backends = BackendRegistry::production(client.clone());
        Ok(Self::with_backends(
            profile,
            args,
            store,
            backends,
            args.notifier(&client),
            ct,
        ))
    }

    pub fn with_backends(
        profile: &ProfileArgs,
        args: &PipelineArgs,
        store: Arc<InMemoryAllocationStore>,
        backends: BackendRegistry,
        notifier: Arc<dyn nese_provisioner::Notifier>,
        ct: &CancellationToken,
    ) -> Self {
        let pipeline = new_pipeline(profile, args, store.clone(), backends, notifier);
        let (queue, pool) = worker_pool(pipeline.clone(), args.worker_pool_options());

        let ct = ct.child_token();
        let pool_task = tokio::spawn(run_worker_pool(pool, ct.clone()));

        Self {
            store,
            provisioner: Provisioner::new(pipeline, queue),
            args: args.clone(),
            pool_task,
            ct,
        }
    }

    /// Stop the worker pool and persist the allocations.
    pub async fn finish(self) -> Result<()> {
        self.ct.cancel();
        if let Err(err) = self.pool_task.await {
            warn!(error = %err, "worker pool task failed");
        }
        self.args.save(&self.store).await
    }
}
