//! Provisioning of object storage buckets for allocations.
//!
//! A provisioning run creates the bucket's management user, then the bucket
//! with its policy, CORS rules and quota, and finally records the issued
//! credentials on the allocation. The quota-only path and the periodic
//! sweep keep bucket quotas in line with their allocation afterwards.

mod bus;
mod error;
mod metrics;
mod notify;
mod pipeline;
mod profile;
mod provisioner;
mod reconcile;
mod steps;
mod task;
mod worker;

pub use self::{
    bus::{InMemoryTaskGroupBus, TaskGroupBus},
    error::{BusError, ProvisionerError, Result, StepError},
    metrics::ProvisionerMetrics,
    notify::{
        InMemoryNotifier, Notification, Notifier, NotifyError, PROVISIONING_FAILED_SUBJECT,
        QUOTA_ADJUSTMENT_FAILED_SUBJECT, TracingNotifier, WebhookNotifier,
    },
    pipeline::{
        DEFAULT_JOIN_TIMEOUT, DEFAULT_MANAGED_RESOURCE, Pipeline, PipelineOptions, PipelineRun,
        RunOutcome, RunState, RunSummary, StepOutcome,
    },
    profile::{
        EnvProfileSource, NESE_ENDPOINT, NESE_ENDPOINT_ACCESS_KEY, NESE_ENDPOINT_REGION,
        NESE_ENDPOINT_SCHEME, NESE_ENDPOINT_SECRET_KEY, NESE_ENDPOINT_TYPE, NESE_ENDPOINT_UID,
        ProfileSource, StaticProfileSource,
    },
    provisioner::Provisioner,
    reconcile::{SweepReport, run_reconciler},
    steps::QuotaRefresh,
    task::{FailedStep, ProvisioningTask, StepName, TaskOutcome},
    worker::{
        DEFAULT_MAX_PENDING_RUNS, DEFAULT_WORKER_COUNT, JobQueue, RunHandle, WorkerPool,
        WorkerPoolOptions, run_worker_pool, worker_pool,
    },
};
