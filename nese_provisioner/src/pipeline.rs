//! The provisioning chain of one allocation.
//!
//! A run walks `Pending -> UserProvisioned -> BucketProvisioned -> Finalized`,
//! or ends in `Failed` when any step fails. Each step runs under the
//! allocation lock and publishes its outcome on the run's task group, so the
//! chain always reaches the finalize step, which either records the new
//! credentials on the allocation or flags it with a provisioning error.

use std::{fmt, sync::Arc, time::Duration};

use nese_allocation::{AllocationStore, with_allocation_lock};
use nese_backend::{BackendRegistry, QuotaRequest, StorageBackend};
use nese_observability::KeyValue;
use nese_resources::{
    Allocation, AllocationId, AttributeName, BackendProfile, BucketName, ProvisioningResult, Quota,
    TaskGroupId,
};
use snafu::ResultExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    bus::TaskGroupBus,
    error::{
        AllocationStoreSnafu, InvalidBucketNameSnafu, ProfileSnafu, ProvisionerError,
        RegistrySnafu, Result, StepError,
    },
    metrics::ProvisionerMetrics,
    notify::Notifier,
    profile::ProfileSource,
    task::{FailedStep, ProvisioningTask, StepName},
};

pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MANAGED_RESOURCE: &str = "NESE S3 Allocation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// How long a step waits for the results of the steps before it.
    pub join_timeout: Duration,
    /// Resource an allocation must belong to for activation to provision it.
    pub managed_resource: String,
    /// Recipients of failure notifications.
    pub notification_recipients: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            managed_resource: DEFAULT_MANAGED_RESOURCE.to_string(),
            notification_recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    UserProvisioned,
    BucketProvisioned,
    Finalized,
    Failed,
}

impl RunState {
    /// The state reached after `step` finished with `success`.
    pub fn advance(self, step: StepName, success: bool) -> RunState {
        match (self, step, success) {
            (RunState::Failed, _, _) | (_, _, false) => RunState::Failed,
            (RunState::Pending, StepName::ProvisionUser, true) => RunState::UserProvisioned,
            (RunState::UserProvisioned, StepName::ProvisionBucket, true) => {
                RunState::BucketProvisioned
            }
            (RunState::BucketProvisioned, StepName::Finalize, true) => RunState::Finalized,
            (state, _, true) => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finalized | RunState::Failed)
    }
}

/// Everything a run needs, resolved once when the run starts.
#[derive(Clone)]
pub struct PipelineRun {
    group: TaskGroupId,
    allocation: Allocation,
    profile: BackendProfile,
    backend: Arc<dyn StorageBackend>,
    bucket: BucketName,
    quota: Quota,
    state: RunState,
}

impl PipelineRun {
    pub fn group(&self) -> TaskGroupId {
        self.group
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn allocation_id(&self) -> AllocationId {
        self.allocation.id
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRun")
            .field("group", &self.group)
            .field("allocation", &self.allocation.id)
            .field("flavor", &self.backend.flavor())
            .field("bucket", &self.bucket)
            .field("quota", &self.quota)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded {
        bucket_name: BucketName,
        quota: Quota,
        /// Number of attributes written. Zero when the allocation was
        /// already provisioned.
        attributes_created: usize,
    },
    Failed {
        failed_steps: Vec<FailedStep>,
    },
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub allocation: AllocationId,
    pub description: String,
    pub group: TaskGroupId,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }

    pub fn failed_steps(&self) -> &[FailedStep] {
        match &self.outcome {
            RunOutcome::Succeeded { .. } => &[],
            RunOutcome::Failed { failed_steps } => failed_steps,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = if self.is_success() {
            "succeeded"
        } else {
            "failed"
        };
        write!(
            f,
            "NESE Bucket allocation for {} {result}.",
            self.description
        )
    }
}

/// What to do after a step finished.
#[derive(Debug)]
pub enum StepOutcome {
    /// Queue the given step next.
    Continue(StepName),
    /// The chain is over.
    Finished(RunSummary),
}

/// Drives the steps of provisioning runs against the configured collaborators.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) store: Arc<dyn AllocationStore>,
    pub(crate) backends: BackendRegistry,
    pub(crate) bus: Arc<dyn TaskGroupBus>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) profiles: Arc<dyn ProfileSource>,
    pub(crate) options: PipelineOptions,
    pub(crate) metrics: Arc<ProvisionerMetrics>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn AllocationStore>,
        backends: BackendRegistry,
        bus: Arc<dyn TaskGroupBus>,
        notifier: Arc<dyn Notifier>,
        profiles: Arc<dyn ProfileSource>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            backends,
            bus,
            notifier,
            profiles,
            options,
            metrics: Arc::new(ProvisionerMetrics::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AllocationStore> {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Build the profile for a new run and select its backend.
    pub fn load_profile(&self) -> Result<(BackendProfile, Arc<dyn StorageBackend>)> {
        let profile = self.profiles.load().context(ProfileSnafu)?;
        let backend = self.backends.get(profile.flavor()).context(RegistrySnafu)?;
        Ok((profile, backend))
    }

    /// Resolve everything a run of `allocation_id` needs.
    ///
    /// Fails without creating a task group when the profile is invalid or
    /// the allocation has no usable bucket name.
    pub async fn start_run(&self, allocation_id: AllocationId) -> Result<PipelineRun> {
        let (profile, backend) = self.load_profile()?;

        let allocation = self
            .store
            .get_allocation(allocation_id)
            .await
            .context(AllocationStoreSnafu {
                operation: "get_allocation",
            })?;

        let bucket = self.bucket_attribute(allocation_id).await?.ok_or(
            ProvisionerError::MissingAttribute {
                allocation: allocation_id,
                attribute: AttributeName::BucketName.as_str(),
            },
        )?;

        let quota = match self.quota_attribute(allocation_id).await? {
            Some(quota) => quota,
            None => Quota::from_terabytes(allocation.quantity),
        };

        let run = PipelineRun {
            group: TaskGroupId::generate(),
            allocation,
            profile,
            backend,
            bucket,
            quota,
            state: RunState::Pending,
        };

        debug!(
            allocation = %allocation_id,
            group = %run.group,
            project = %run.allocation.project_title,
            bucket = %run.bucket,
            quota = %run.quota,
            "starting bucket allocation chain"
        );
        self.metrics.runs_started.add(1, &[]);

        Ok(run)
    }

    /// Run one step of `run` under the allocation lock.
    pub async fn execute_step(&self, run: &mut PipelineRun, step: StepName) -> StepOutcome {
        let started = Instant::now();
        let allocation_id = run.allocation_id();

        let outcome = match step {
            StepName::Finalize => {
                let summary =
                    match with_allocation_lock(self.store.as_ref(), allocation_id, self.finalize(run))
                        .await
                    {
                        Ok(summary) => summary,
                        Err(source) => {
                            let err = StepError::Store {
                                operation: "lock_allocation",
                                source,
                            };
                            let failed = vec![FailedStep::new(step, err.diagnostic())];
                            self.fail_run(run, failed).await
                        }
                    };
                run.state = run.state.advance(step, summary.is_success());
                StepOutcome::Finished(summary)
            }
            step => {
                let task =
                    match with_allocation_lock(self.store.as_ref(), allocation_id, self.run_task(run, step))
                        .await
                    {
                        Ok(task) => task,
                        Err(source) => {
                            let err = StepError::Store {
                                operation: "lock_allocation",
                                source,
                            };
                            let task = ProvisioningTask::failed(step, err.diagnostic());
                            self.publish(run.group, task.clone()).await;
                            task
                        }
                    };
                run.state = run.state.advance(step, task.success());
                match step.next() {
                    Some(next) => StepOutcome::Continue(next),
                    None => StepOutcome::Finished(RunSummary {
                        allocation: allocation_id,
                        description: run.allocation.description.clone(),
                        group: run.group,
                        outcome: RunOutcome::Failed {
                            failed_steps: vec![FailedStep::new(
                                step,
                                "step is not part of a provisioning chain",
                            )],
                        },
                    }),
                }
            }
        };

        self.metrics.step_duration.record(
            started.elapsed().as_secs_f64(),
            &[KeyValue::new("step", step.as_str())],
        );

        outcome
    }

    /// Run a provisioning step and publish its task.
    async fn run_task(&self, run: &PipelineRun, step: StepName) -> ProvisioningTask {
        let result = match step {
            StepName::ProvisionUser => self.provision_user(run).await.map(ProvisioningResult::from),
            StepName::ProvisionBucket => self.provision_bucket(run).await.map(ProvisioningResult::from),
            StepName::Finalize | StepName::RefreshQuota => Err(StepError::MissingDependency {
                step,
                message: "not a task producing step".to_string(),
            }),
        };

        let task = match result {
            Ok(result) => ProvisioningTask::succeeded(step, result),
            Err(err) => {
                warn!(
                    allocation = %run.allocation_id(),
                    group = %run.group,
                    %step,
                    kind = %err.kind(),
                    error = %err.diagnostic(),
                    "provisioning step failed"
                );
                self.metrics.step_failures.add(
                    1,
                    &[
                        KeyValue::new("step", step.as_str()),
                        KeyValue::new("kind", err.kind().as_str()),
                    ],
                );
                ProvisioningTask::failed(step, err.diagnostic())
            }
        };

        self.publish(run.group, task.clone()).await;
        task
    }

    async fn publish(&self, group: TaskGroupId, task: ProvisioningTask) {
        let step = task.name;
        if let Err(err) = self.bus.publish(group, task).await {
            // The join of the next step will time out and fail the run.
            warn!(%group, %step, error = %err, "failed to publish task");
        }
    }

    /// Drive every step of `run` on the current task and clean up.
    pub async fn run(&self, mut run: PipelineRun) -> RunSummary {
        let mut step = StepName::ProvisionUser;
        let summary = loop {
            match self.execute_step(&mut run, step).await {
                StepOutcome::Continue(next) => step = next,
                StepOutcome::Finished(summary) => break summary,
            }
        };

        self.finish_run(&run, &summary).await;
        summary
    }

    /// Delete the run's task group and account for the outcome.
    pub async fn finish_run(&self, run: &PipelineRun, summary: &RunSummary) {
        if let Err(err) = self.bus.delete(run.group).await {
            warn!(group = %run.group, error = %err, "failed to delete task group");
        }

        if summary.is_success() {
            self.metrics.runs_succeeded.add(1, &[]);
            info!(allocation = %summary.allocation, group = %summary.group, "{summary}");
        } else {
            self.metrics.runs_failed.add(1, &[]);
            warn!(
                allocation = %summary.allocation,
                group = %summary.group,
                failed_steps = ?summary.failed_steps(),
                "{summary}"
            );
        }
    }

    /// Drop the task group of a run that will not be driven to the end.
    pub(crate) async fn abandon_run(&self, run: &PipelineRun) {
        if let Err(err) = self.bus.delete(run.group).await {
            warn!(group = %run.group, error = %err, "failed to delete task group");
        }
        self.metrics.runs_failed.add(1, &[]);
    }

    pub(crate) async fn bucket_attribute(
        &self,
        allocation_id: AllocationId,
    ) -> Result<Option<BucketName>> {
        let value = self
            .store
            .get_attribute(allocation_id, AttributeName::BucketName)
            .await
            .context(AllocationStoreSnafu {
                operation: "get_attribute",
            })?;

        value
            .map(|value| {
                BucketName::new(value.as_text()).context(InvalidBucketNameSnafu {
                    allocation: allocation_id,
                })
            })
            .transpose()
    }

    pub(crate) async fn quota_attribute(&self, allocation_id: AllocationId) -> Result<Option<Quota>> {
        let value = self
            .store
            .get_attribute(allocation_id, AttributeName::Quota)
            .await
            .context(AllocationStoreSnafu {
                operation: "get_attribute",
            })?;

        value
            .map(|value| {
                value
                    .as_u64()
                    .map(Quota::from_terabytes)
                    .ok_or_else(|| ProvisionerError::InvalidAttribute {
                        allocation: allocation_id,
                        attribute: AttributeName::Quota.as_str(),
                        value: value.as_text(),
                    })
            })
            .transpose()
    }

    /// The quota update for `allocation`, labelled with its resource and project.
    pub(crate) fn quota_request(
        allocation: &Allocation,
        bucket: &BucketName,
        quota: Quota,
    ) -> QuotaRequest {
        let mut request = QuotaRequest::new(bucket.clone(), quota);
        let labels = [
            ("rsrc", allocation.parent_resource().unwrap_or_default()),
            ("pi", allocation.project_pi.as_str()),
            ("projname", allocation.project_title.as_str()),
        ];
        for (key, value) in labels {
            if !value.is_empty() {
                request = request.with_label(key, value);
            }
        }
        request
    }
}
