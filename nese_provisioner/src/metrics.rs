use nese_observability::{Counter, Histogram};

#[derive(Debug, Clone)]
pub struct ProvisionerMetrics {
    pub runs_started: Counter<u64>,
    pub runs_succeeded: Counter<u64>,
    pub runs_failed: Counter<u64>,
    pub step_duration: Histogram<f64>,
    pub step_failures: Counter<u64>,
    pub quota_refreshes: Counter<u64>,
    pub quota_refresh_failures: Counter<u64>,
    pub quota_drift: Counter<u64>,
}

impl Default for ProvisionerMetrics {
    fn default() -> Self {
        let meter = nese_observability::meter("provisioner");

        Self {
            runs_started: meter
                .u64_counter("provisioner.runs.started")
                .with_description("provisioning runs started")
                .build(),
            runs_succeeded: meter
                .u64_counter("provisioner.runs.succeeded")
                .with_description("provisioning runs that recorded credentials")
                .build(),
            runs_failed: meter
                .u64_counter("provisioner.runs.failed")
                .with_description("provisioning runs that ended in a provisioning error")
                .build(),
            step_duration: meter
                .f64_histogram("provisioner.step.duration")
                .with_unit("s")
                .with_description("time spent in a pipeline step, lock wait included")
                .build(),
            step_failures: meter
                .u64_counter("provisioner.step.failures")
                .with_description("pipeline steps that published a failed task")
                .build(),
            quota_refreshes: meter
                .u64_counter("provisioner.quota.refreshes")
                .with_description("bucket quota updates")
                .build(),
            quota_refresh_failures: meter
                .u64_counter("provisioner.quota.refresh_failures")
                .with_description("bucket quota updates that failed")
                .build(),
            quota_drift: meter
                .u64_counter("provisioner.quota.drift")
                .with_description("buckets whose quota differed from their allocation")
                .build(),
        }
    }
}
