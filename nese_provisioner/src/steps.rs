use nese_allocation::{AllocationStoreError, with_allocation_lock};
use nese_resources::{
    AllocationId, AllocationStatus, AttributeName, AttributeValue, BucketName, BucketResult, Quota,
    UserResult,
};
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::{
    error::{
        AllocationStoreSnafu, BackendSnafu, JoinSnafu, ProvisionerError, QuotaUpdateSnafu, Result,
        StepError, StoreSnafu,
    },
    notify::{Notification, PROVISIONING_FAILED_SUBJECT, QUOTA_ADJUSTMENT_FAILED_SUBJECT},
    pipeline::{Pipeline, PipelineRun, RunOutcome, RunSummary},
    task::{FailedStep, ProvisioningTask, StepName, find_bucket_result, find_user_result},
};

/// Outcome of a quota-only update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRefresh {
    pub allocation: AllocationId,
    pub bucket_name: Option<BucketName>,
    pub quota: Option<Quota>,
    pub task: ProvisioningTask,
}

impl QuotaRefresh {
    pub fn is_success(&self) -> bool {
        self.task.success()
    }
}

impl Pipeline {
    /// Create (or find) the management user of the run's bucket.
    pub(crate) async fn provision_user(&self, run: &PipelineRun) -> Result<UserResult, StepError> {
        let user_name = run.bucket().management_user();
        debug!(allocation = %run.allocation_id(), user = %user_name, "provisioning bucket user");

        let user = run
            .backend()
            .create_user(&user_name, run.profile())
            .await
            .context(BackendSnafu {
                operation: "create_user",
            })?;

        debug!(allocation = %run.allocation_id(), user = %user.uid, "bucket user provisioned");
        Ok(user)
    }

    /// Create the bucket and apply its policy, CORS rules and quota.
    ///
    /// Needs the user published by the previous step and performs no backend
    /// call when it is missing or failed.
    pub(crate) async fn provision_bucket(
        &self,
        run: &PipelineRun,
    ) -> Result<BucketResult, StepError> {
        let step = StepName::ProvisionBucket;
        let bucket = run.bucket();

        let tasks = self
            .bus
            .join(run.group(), 1, self.options.join_timeout)
            .await
            .context(JoinSnafu { step })?;

        if let Some(failed) = tasks.iter().find(|task| !task.success()) {
            return Err(StepError::MissingDependency {
                step,
                message: format!(
                    "cannot create bucket {bucket}, depends on failed {} task",
                    failed.name
                ),
            });
        }

        let user = find_user_result(&tasks).ok_or_else(|| StepError::MissingDependency {
            step,
            message: format!("cannot create bucket {bucket}, depends on missing user result"),
        })?;

        let backend = run.backend();
        let profile = run.profile();

        backend
            .create_bucket(bucket, profile)
            .await
            .context(BackendSnafu {
                operation: "create_bucket",
            })?;

        backend
            .apply_access_policy(bucket, &user.uid, profile)
            .await
            .context(BackendSnafu {
                operation: "apply_access_policy",
            })?;

        if backend.supports_cors() {
            backend
                .apply_cors(bucket, profile)
                .await
                .context(BackendSnafu {
                    operation: "apply_cors",
                })?;
        }

        let request = Pipeline::quota_request(run.allocation(), bucket, run.quota());
        backend
            .set_quota(&request, profile)
            .await
            .context(BackendSnafu {
                operation: "set_quota",
            })?;

        debug!(allocation = %run.allocation_id(), %bucket, quota = %run.quota(), "bucket provisioned");

        Ok(BucketResult {
            bucket_name: bucket.clone(),
            quota: run.quota(),
        })
    }

    /// Record the run's results on the allocation, or flag it as failed.
    pub(crate) async fn finalize(&self, run: &PipelineRun) -> RunSummary {
        let step = StepName::Finalize;

        let tasks = match self
            .bus
            .join(run.group(), 2, self.options.join_timeout)
            .await
            .context(JoinSnafu { step })
        {
            Ok(tasks) => tasks,
            Err(err) => {
                return self
                    .fail_run(run, vec![FailedStep::new(step, err.diagnostic())])
                    .await;
            }
        };

        let failed: Vec<FailedStep> = tasks
            .iter()
            .filter_map(|task| {
                task.diagnostic()
                    .map(|diagnostic| FailedStep::new(task.name, diagnostic))
            })
            .collect();
        if !failed.is_empty() {
            return self.fail_run(run, failed).await;
        }

        let (Some(user), Some(bucket)) = (find_user_result(&tasks), find_bucket_result(&tasks))
        else {
            let err = StepError::MissingDependency {
                step,
                message: "the run did not produce both a user and a bucket".to_string(),
            };
            return self
                .fail_run(run, vec![FailedStep::new(step, err.diagnostic())])
                .await;
        };

        match self
            .record_results(run.allocation_id(), user, bucket)
            .await
        {
            Ok(attributes_created) => RunSummary {
                allocation: run.allocation_id(),
                description: run.allocation().description.clone(),
                group: run.group(),
                outcome: RunOutcome::Succeeded {
                    bucket_name: bucket.bucket_name.clone(),
                    quota: bucket.quota,
                    attributes_created,
                },
            },
            Err(err) => {
                self.fail_run(run, vec![FailedStep::new(step, err.diagnostic())])
                    .await
            }
        }
    }

    /// Write the results as allocation attributes in one atomic write, never
    /// overwriting.
    async fn record_results(
        &self,
        allocation_id: AllocationId,
        user: &UserResult,
        bucket: &BucketResult,
    ) -> Result<usize, StepError> {
        let quota = i64::try_from(bucket.quota.terabytes()).map_err(|_| StepError::Store {
            operation: "create_attributes_if_absent",
            source: AllocationStoreError::InvalidAttribute {
                name: AttributeName::Quota,
                message: format!("{} does not fit the attribute", bucket.quota),
            },
        })?;

        let attributes = vec![
            (
                AttributeName::BucketName,
                AttributeValue::text(bucket.bucket_name.as_str()),
            ),
            (
                AttributeName::AccessKey,
                AttributeValue::text(user.access_key.as_str()),
            ),
            (
                AttributeName::SecretKey,
                AttributeValue::text(user.secret_key.as_str()),
            ),
            (AttributeName::Quota, AttributeValue::Int(quota)),
        ];

        self.store
            .create_attributes_if_absent(allocation_id, attributes)
            .await
            .context(StoreSnafu {
                operation: "create_attributes_if_absent",
            })
    }

    /// Flag the allocation with a provisioning error and notify operators.
    pub(crate) async fn fail_run(&self, run: &PipelineRun, failed: Vec<FailedStep>) -> RunSummary {
        let allocation_id = run.allocation_id();

        for step in &failed {
            warn!(allocation = %allocation_id, step = %step.step, diagnostic = %step.diagnostic, "provisioning task failed");
        }

        if let Err(err) = self
            .store
            .set_status(allocation_id, AllocationStatus::ProvisioningError)
            .await
        {
            error!(allocation = %allocation_id, error = %err, "failed to flag allocation with a provisioning error");
        }

        let notification = Notification::new(PROVISIONING_FAILED_SUBJECT, allocation_id)
            .with_context("description", &run.allocation().description)
            .with_context("project", &run.allocation().project_title)
            .with_context("bucket_name", run.bucket())
            .with_failed_steps(failed.clone())
            .with_recipients(self.options.notification_recipients.clone());

        if let Err(err) = self.notifier.notify(&notification).await {
            error!(allocation = %allocation_id, error = %err, "failed to send provisioning failure notification");
        }

        RunSummary {
            allocation: allocation_id,
            description: run.allocation().description.clone(),
            group: run.group(),
            outcome: RunOutcome::Failed {
                failed_steps: failed,
            },
        }
    }

    /// Push the allocation's quota attribute to its bucket.
    ///
    /// Runs as a single locked step. Configuration errors are returned;
    /// everything else is reported as a failed refresh and notified.
    pub async fn refresh_quota(&self, allocation_id: AllocationId) -> Result<QuotaRefresh> {
        let (profile, backend) = self.load_profile()?;

        let locked = with_allocation_lock(self.store.as_ref(), allocation_id, async {
            let mut refresh = QuotaRefresh {
                allocation: allocation_id,
                bucket_name: None,
                quota: None,
                task: ProvisioningTask::failed(StepName::RefreshQuota, ""),
            };

            let result: Result<BucketResult, ProvisionerError> = async {
                let allocation = self
                    .store
                    .get_allocation(allocation_id)
                    .await
                    .context(AllocationStoreSnafu {
                        operation: "get_allocation",
                    })?;
                refresh.quota = self.quota_attribute(allocation_id).await?;
                refresh.bucket_name = self.bucket_attribute(allocation_id).await?;

                let (Some(bucket), Some(quota)) = (refresh.bucket_name.clone(), refresh.quota)
                else {
                    let attribute = if refresh.bucket_name.is_none() {
                        AttributeName::BucketName
                    } else {
                        AttributeName::Quota
                    };
                    return Err(ProvisionerError::MissingAttribute {
                        allocation: allocation_id,
                        attribute: attribute.as_str(),
                    });
                };

                let request = Pipeline::quota_request(&allocation, &bucket, quota);
                backend
                    .set_quota(&request, &profile)
                    .await
                    .context(QuotaUpdateSnafu {
                        allocation: allocation_id,
                    })?;

                Ok(BucketResult {
                    bucket_name: bucket,
                    quota,
                })
            }
            .await;

            refresh.task = match result {
                Ok(bucket) => ProvisioningTask::succeeded(StepName::RefreshQuota, bucket),
                Err(err) => ProvisioningTask::failed(StepName::RefreshQuota, err.diagnostic()),
            };
            refresh
        })
        .await;

        let refresh = match locked {
            Ok(refresh) => refresh,
            Err(source) => QuotaRefresh {
                allocation: allocation_id,
                bucket_name: None,
                quota: None,
                task: ProvisioningTask::failed(
                    StepName::RefreshQuota,
                    StepError::Store {
                        operation: "lock_allocation",
                        source,
                    }
                    .diagnostic(),
                ),
            },
        };

        self.metrics.quota_refreshes.add(1, &[]);
        if refresh.is_success() {
            info!(allocation = %allocation_id, bucket = ?refresh.bucket_name, quota = ?refresh.quota, "bucket quota refreshed");
        } else {
            self.metrics.quota_refresh_failures.add(1, &[]);
            self.notify_quota_failure(&refresh).await;
        }

        Ok(refresh)
    }

    async fn notify_quota_failure(&self, refresh: &QuotaRefresh) {
        let diagnostic = refresh.task.diagnostic().unwrap_or_default();
        warn!(allocation = %refresh.allocation, %diagnostic, "bucket quota adjustment failed");

        let mut notification =
            Notification::new(QUOTA_ADJUSTMENT_FAILED_SUBJECT, refresh.allocation)
                .with_failed_steps(vec![FailedStep::new(StepName::RefreshQuota, diagnostic)])
                .with_recipients(self.options.notification_recipients.clone());
        if let Some(bucket) = &refresh.bucket_name {
            notification = notification.with_context("bucket_name", bucket);
        }
        if let Some(quota) = refresh.quota {
            notification = notification.with_context("quota", quota);
        }

        if let Err(err) = self.notifier.notify(&notification).await {
            error!(allocation = %refresh.allocation, error = %err, "failed to send quota failure notification");
        }
    }
}
