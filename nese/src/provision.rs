use clap::Args;
use nese_resources::AllocationId;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    args::{PipelineArgs, ProfileArgs},
    error::{CliError, ProvisionerSnafu, Result},
    session::Session,
};

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Allocation to provision. Provisions every pending allocation if omitted.
    #[arg(long)]
    allocation: Option<AllocationId>,
    #[clap(flatten)]
    profile: ProfileArgs,
    #[clap(flatten)]
    pipeline: PipelineArgs,
}

impl ProvisionArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let session = Session::start(&self.profile, &self.pipeline, &ct).await?;

        let handles = match session.provisioner.provision(self.allocation).await {
            Ok(handles) => handles,
            Err(source) => {
                session.finish().await?;
                return Err(CliError::Provisioner {
                    operation: "provision",
                    source,
                });
            }
        };

        let total = handles.len();
        let mut failed = 0;
        for handle in handles {
            match handle.wait().await {
                Ok(summary) => {
                    println!("{summary}");
                    for step in summary.failed_steps() {
                        println!("  {}: {}", step.step, step.diagnostic);
                    }
                    if !summary.is_success() {
                        failed += 1;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "run did not finish");
                    failed += 1;
                }
            }
        }

        session.finish().await?;

        if total == 0 {
            println!("No allocation to provision");
        }
        if failed > 0 {
            return Err(CliError::Failed {
                operation: "provisioning runs",
                failed,
                total,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct RefreshQuotaArgs {
    /// Allocation whose bucket quota is updated.
    allocation: AllocationId,
    #[clap(flatten)]
    profile: ProfileArgs,
    #[clap(flatten)]
    pipeline: PipelineArgs,
}

impl RefreshQuotaArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let session = Session::start(&self.profile, &self.pipeline, &ct).await?;
        let refresh = session.provisioner.refresh_quota(self.allocation).await;
        session.finish().await?;

        let refresh = refresh.context(ProvisionerSnafu {
            operation: "refresh_quota",
        })?;

        match refresh.task.diagnostic() {
            None => println!(
                "Quota of allocation {} set to {}",
                refresh.allocation,
                refresh.quota.map(|q| q.to_string()).unwrap_or_default()
            ),
            Some(diagnostic) => {
                println!("Quota of allocation {} not updated: {diagnostic}", refresh.allocation);
                return Err(CliError::Failed {
                    operation: "quota refreshes",
                    failed: 1,
                    total: 1,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    #[clap(flatten)]
    profile: ProfileArgs,
    #[clap(flatten)]
    pipeline: PipelineArgs,
}

impl ReconcileArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let session = Session::start(&self.profile, &self.pipeline, &ct).await?;
        let report = session.provisioner.reconcile_quota_sweep().await;
        session.finish().await?;

        let report = report.context(ProvisionerSnafu {
            operation: "reconcile_quota_sweep",
        })?;

        println!("Checked: {}", report.checked);
        println!("Skipped: {}", report.skipped);
        println!("Read errors: {}", report.errors);
        println!("Drifted: {}", report.drifted.len());
        for allocation in &report.drifted {
            println!("  allocation {allocation}");
        }

        if report.refresh_failures > 0 {
            return Err(CliError::Failed {
                operation: "quota refreshes",
                failed: report.refresh_failures,
                total: report.drifted.len(),
            });
        }
        Ok(())
    }
}
