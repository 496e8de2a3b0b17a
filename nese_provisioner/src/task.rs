use std::fmt;

use nese_resources::{BucketResult, ProvisioningResult, UserResult};
use serde::{Deserialize, Serialize};

/// The steps a pipeline run is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    ProvisionUser,
    ProvisionBucket,
    Finalize,
    RefreshQuota,
}

impl StepName {
    /// The steps of a provisioning chain, in execution order.
    pub const CHAIN: [StepName; 3] = [
        StepName::ProvisionUser,
        StepName::ProvisionBucket,
        StepName::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisionUser => "provision_user",
            Self::ProvisionBucket => "provision_bucket",
            Self::Finalize => "finalize",
            Self::RefreshQuota => "refresh_quota",
        }
    }

    /// The step that follows this one in a provisioning chain.
    pub fn next(&self) -> Option<StepName> {
        match self {
            Self::ProvisionUser => Some(Self::ProvisionBucket),
            Self::ProvisionBucket => Some(Self::Finalize),
            Self::Finalize | Self::RefreshQuota => None,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(ProvisioningResult),
    Failed(String),
}

/// A finished unit of work, published on the run's task group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningTask {
    pub name: StepName,
    pub outcome: TaskOutcome,
}

impl ProvisioningTask {
    pub fn succeeded(name: StepName, result: impl Into<ProvisioningResult>) -> Self {
        Self {
            name,
            outcome: TaskOutcome::Succeeded(result.into()),
        }
    }

    pub fn failed(name: StepName, diagnostic: impl Into<String>) -> Self {
        Self {
            name,
            outcome: TaskOutcome::Failed(diagnostic.into()),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }

    pub fn result(&self) -> Option<&ProvisioningResult> {
        match &self.outcome {
            TaskOutcome::Succeeded(result) => Some(result),
            TaskOutcome::Failed(_) => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Succeeded(_) => None,
            TaskOutcome::Failed(diagnostic) => Some(diagnostic),
        }
    }
}

/// A failed task, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step: StepName,
    pub diagnostic: String,
}

impl FailedStep {
    pub fn new(step: StepName, diagnostic: impl Into<String>) -> Self {
        Self {
            step,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Find the first successful user result among `tasks`, whatever their order.
pub fn find_user_result(tasks: &[ProvisioningTask]) -> Option<&UserResult> {
    tasks
        .iter()
        .filter_map(ProvisioningTask::result)
        .find_map(ProvisioningResult::as_user)
}

/// Find the first successful bucket result among `tasks`, whatever their order.
pub fn find_bucket_result(tasks: &[ProvisioningTask]) -> Option<&BucketResult> {
    tasks
        .iter()
        .filter_map(ProvisioningTask::result)
        .find_map(ProvisioningResult::as_bucket)
}
