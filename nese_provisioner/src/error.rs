use std::time::Duration;

use nese_allocation::AllocationStoreError;
use nese_backend::BackendError;
use nese_observability::ErrorKind;
use nese_resources::{AllocationId, BucketNameError, ProfileError, TaskGroupId};
use snafu::Snafu;

use crate::task::StepName;

/// Errors raised by the task group bus.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum BusError {
    #[snafu(display(
        "task group {group} has {found} of {expected} expected tasks after {timeout:?}"
    ))]
    JoinTimeout {
        group: TaskGroupId,
        expected: usize,
        found: usize,
        timeout: Duration,
    },
}

/// Errors raised inside a pipeline step.
///
/// Step errors never abort a run: they are recorded as failed tasks and
/// surface through the finalize step.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StepError {
    #[snafu(display("{step} cannot run: {message}"))]
    MissingDependency { step: StepName, message: String },
    #[snafu(display("{step} could not collect its dependencies"))]
    Join { step: StepName, source: BusError },
    #[snafu(display("backend operation {operation} failed"))]
    Backend {
        operation: &'static str,
        source: BackendError,
    },
    #[snafu(display("allocation store operation {operation} failed"))]
    Store {
        operation: &'static str,
        source: AllocationStoreError,
    },
}

/// Errors returned by the provisioner entry points.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProvisionerError {
    #[snafu(display("invalid backend profile"))]
    Profile { source: ProfileError },
    #[snafu(display("no backend for the configured endpoint"))]
    Registry { source: BackendError },
    #[snafu(display("allocation store operation {operation} failed"))]
    AllocationStore {
        operation: &'static str,
        source: AllocationStoreError,
    },
    #[snafu(display("allocation {allocation} has no {attribute} attribute"))]
    MissingAttribute {
        allocation: AllocationId,
        attribute: &'static str,
    },
    #[snafu(display("allocation {allocation} has an invalid {attribute} attribute: {value}"))]
    InvalidAttribute {
        allocation: AllocationId,
        attribute: &'static str,
        value: String,
    },
    #[snafu(display("allocation {allocation} has an invalid bucket name"))]
    InvalidBucketName {
        allocation: AllocationId,
        source: BucketNameError,
    },
    #[snafu(display("failed to update the bucket quota of allocation {allocation}"))]
    QuotaUpdate {
        allocation: AllocationId,
        source: BackendError,
    },
    #[snafu(display("the worker pool is not accepting runs"))]
    WorkerPoolClosed,
    #[snafu(display("run {group} for allocation {allocation} was abandoned before finishing"))]
    RunAbandoned {
        allocation: AllocationId,
        group: TaskGroupId,
    },
}

pub type Result<T, E = ProvisionerError> = std::result::Result<T, E>;

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingDependency { .. } | Self::Join { .. } => ErrorKind::Conflict,
            Self::Backend { source, .. } => source.kind(),
            Self::Store { source, .. } => source.kind(),
        }
    }

    /// Diagnostic recorded on the failed task, including the error chain.
    pub fn diagnostic(&self) -> String {
        error_chain(self)
    }
}

impl ProvisionerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Profile { .. } | Self::Registry { .. } => ErrorKind::Configuration,
            Self::AllocationStore { source, .. } => source.kind(),
            Self::MissingAttribute { .. }
            | Self::InvalidAttribute { .. }
            | Self::InvalidBucketName { .. } => ErrorKind::Validation,
            Self::QuotaUpdate { source, .. } => source.kind(),
            Self::WorkerPoolClosed | Self::RunAbandoned { .. } => ErrorKind::Temporary,
        }
    }

    pub fn diagnostic(&self) -> String {
        error_chain(self)
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}
