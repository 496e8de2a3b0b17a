//! Periodic correction of bucket quotas that drifted from their allocation.

use std::time::Duration;

use nese_observability::KeyValue;
use nese_resources::AllocationId;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{AllocationStoreSnafu, ProvisionerError, Result},
    provisioner::Provisioner,
};

/// What a sweep found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Allocations whose bucket quota was read.
    pub checked: usize,
    /// Allocations whose bucket quota differed and was refreshed.
    pub drifted: Vec<AllocationId>,
    /// Allocations without a quota or bucket, or on a backend that cannot
    /// report quotas.
    pub skipped: usize,
    /// Allocations whose bucket quota could not be read.
    pub errors: usize,
    pub refresh_failures: usize,
}

impl Provisioner {
    /// Compare the quota of every provisioned bucket with its allocation and
    /// refresh the ones that differ.
    pub async fn reconcile_quota_sweep(&self) -> Result<SweepReport> {
        let pipeline = &self.pipeline;
        let (profile, backend) = pipeline.load_profile()?;

        let allocations = pipeline
            .store()
            .list_allocations()
            .await
            .context(AllocationStoreSnafu {
                operation: "list_allocations",
            })?;

        let mut report = SweepReport::default();

        if !backend.supports_quota_read() {
            debug!(flavor = %backend.flavor(), "backend cannot report bucket quotas, skipping sweep");
            report.skipped = allocations.len();
            return Ok(report);
        }

        for allocation_id in allocations {
            let attributes = async {
                let quota = pipeline.quota_attribute(allocation_id).await?;
                let bucket = pipeline.bucket_attribute(allocation_id).await?;
                Ok::<_, ProvisionerError>(quota.zip(bucket))
            }
            .await;

            let (desired, bucket) = match attributes {
                Ok(Some(attributes)) => attributes,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(allocation = %allocation_id, error = %err, "failed to read allocation attributes");
                    report.errors += 1;
                    continue;
                }
            };

            let actual = match backend.get_quota(&bucket, &profile).await {
                Ok(actual) => actual,
                Err(err) => {
                    warn!(allocation = %allocation_id, %bucket, error = %err, "failed to read bucket quota");
                    report.errors += 1;
                    continue;
                }
            };

            report.checked += 1;
            if actual == desired {
                continue;
            }

            info!(allocation = %allocation_id, %bucket, %desired, %actual, "bucket quota drifted");
            pipeline.metrics.quota_drift.add(
                1,
                &[KeyValue::new("flavor", backend.flavor().to_string())],
            );
            report.drifted.push(allocation_id);

            match self.refresh_quota(allocation_id).await {
                Ok(refresh) if refresh.is_success() => {}
                Ok(_) => report.refresh_failures += 1,
                Err(err) => {
                    warn!(allocation = %allocation_id, error = %err, "failed to refresh bucket quota");
                    report.refresh_failures += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            drifted = report.drifted.len(),
            skipped = report.skipped,
            errors = report.errors,
            "quota sweep done"
        );

        Ok(report)
    }
}

/// Run a quota sweep every `interval` until `ct` is cancelled.
pub async fn run_reconciler(provisioner: Provisioner, interval: Duration, ct: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ct.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = provisioner.reconcile_quota_sweep().await {
                    warn!(error = %err, "quota sweep failed");
                }
            }
        }
    }

    debug!("reconciler stopped");
}
