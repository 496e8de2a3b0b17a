use std::{sync::Arc, time::Duration};

use clap::Args;
use nese_allocation::InMemoryAllocationStore;
use nese_backend::{BackendRegistry, InMemoryBackend};
use nese_provisioner::{TracingNotifier, run_reconciler};
use nese_resources::EndpointFlavor;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    allocations,
    args::{PipelineArgs, ProfileArgs},
    error::{ProvisionerSnafu, Result},
    session::Session,
};

#[derive(Debug, Args)]
pub struct DevArgs {
    /// Seconds between two quota sweeps.
    #[arg(long, default_value_t = 60)]
    interval: u64,
    #[clap(flatten)]
    profile: ProfileArgs,
    #[clap(flatten)]
    pipeline: PipelineArgs,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let store = match &self.pipeline.allocations {
            Some(_) => self.pipeline.store().await?,
            None => {
                let store = Arc::new(InMemoryAllocationStore::new());
                allocations::seed(&store, allocations::dev_records()).await?;
                store
            }
        };

        let backends = EndpointFlavor::ALL
            .into_iter()
            .fold(BackendRegistry::new(), |registry, flavor| {
                registry.with_backend(Arc::new(InMemoryBackend::new(flavor)))
            });

        let profile = dev_profile(self.profile.clone());

        println!("Starting the NESE provisioner in development mode");
        println!("Endpoint type: {}", profile.endpoint_type);
        println!("Workers: {}", self.pipeline.workers);
        println!("Quota sweep interval: {}s", self.interval);

        let session = Session::with_backends(
            &profile,
            &self.pipeline,
            store,
            backends,
            Arc::new(TracingNotifier),
            &ct,
        );

        let handles = session
            .provisioner
            .provision(None)
            .await
            .context(ProvisionerSnafu {
                operation: "provision",
            })?;
        for handle in handles {
            tokio::spawn(async move {
                match handle.wait().await {
                    Ok(summary) => info!(allocation = %summary.allocation, "{summary}"),
                    Err(err) => warn!(error = %err, "run did not finish"),
                }
            });
        }

        run_reconciler(
            session.provisioner.clone(),
            Duration::from_secs(self.interval),
            ct.clone(),
        )
        .await;

        session.finish().await
    }
}

/// Fill the connection settings the operator did not give with local values.
fn dev_profile(mut profile: ProfileArgs) -> ProfileArgs {
    profile.endpoint.get_or_insert_with(|| "localhost:9000".to_string());
    profile.access_key.get_or_insert_with(|| "dev".to_string());
    profile.secret_key.get_or_insert_with(|| "dev-secret".to_string());
    if profile.endpoint_type == EndpointFlavor::Rgw.to_string() {
        profile.uid.get_or_insert_with(|| "dev-owner".to_string());
    }
    profile
}
