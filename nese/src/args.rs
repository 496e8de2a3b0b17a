use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Args;
use nese_allocation::InMemoryAllocationStore;
use nese_backend::BackendRegistry;
use nese_provisioner::{
    DEFAULT_MANAGED_RESOURCE, DEFAULT_WORKER_COUNT, InMemoryTaskGroupBus, Notifier, Pipeline,
    PipelineOptions, StaticProfileSource, TracingNotifier, WebhookNotifier, WorkerPoolOptions,
};
use nese_resources::RawProfile;
use snafu::ResultExt;

use crate::{
    allocations,
    error::{HttpClientSnafu, Result},
};

/// Connection to the storage endpoint.
#[derive(Debug, Clone, Args)]
pub struct ProfileArgs {
    /// Host, and optional port, of the storage endpoint.
    #[arg(long = "endpoint", env = "NESE_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Provisioning flavor of the endpoint: rgw or minio.
    #[arg(long = "endpoint-type", env = "NESE_ENDPOINT_TYPE", default_value = "rgw")]
    pub endpoint_type: String,
    /// URL scheme used to reach the endpoint.
    #[arg(long = "endpoint-scheme", env = "NESE_ENDPOINT_SCHEME", default_value = "https")]
    pub endpoint_scheme: String,
    #[arg(long = "access-key", env = "NESE_ENDPOINT_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,
    #[arg(long = "secret-key", env = "NESE_ENDPOINT_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// Owner of the buckets, required by rgw.
    #[arg(long = "uid", env = "NESE_ENDPOINT_UID")]
    pub uid: Option<String>,
    #[arg(long = "region", env = "NESE_ENDPOINT_REGION")]
    pub region: Option<String>,
}

impl ProfileArgs {
    pub fn raw_profile(&self) -> RawProfile {
        RawProfile {
            endpoint_host: self.endpoint.clone(),
            endpoint_flavor: Some(self.endpoint_type.clone()),
            url_scheme: Some(self.endpoint_scheme.clone()),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            uid: self.uid.clone(),
            region: self.region.clone(),
        }
    }
}

/// Pipeline settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// JSON file holding the allocations to work on. Updated in place.
    #[arg(long, env = "NESE_ALLOCATIONS")]
    pub allocations: Option<PathBuf>,
    /// Seconds a step waits for the results of the previous steps.
    #[arg(long, default_value_t = 5)]
    pub join_timeout: u64,
    /// Resource an activated allocation must belong to.
    #[arg(long, default_value = DEFAULT_MANAGED_RESOURCE)]
    pub managed_resource: String,
    /// Ticket endpoint receiving failure notifications as JSON.
    #[arg(long, env = "NESE_NOTIFY_WEBHOOK")]
    pub notify_webhook: Option<String>,
    /// Recipient of failure notifications. Can be repeated.
    #[arg(long = "notify-recipient", env = "NESE_NOTIFY_RECIPIENTS", value_delimiter = ',')]
    pub notify_recipients: Vec<String>,
    /// Number of workers executing pipeline steps.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    pub workers: usize,
}

impl PipelineArgs {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            join_timeout: Duration::from_secs(self.join_timeout),
            managed_resource: self.managed_resource.clone(),
            notification_recipients: self.notify_recipients.clone(),
        }
    }

    pub fn worker_pool_options(&self) -> WorkerPoolOptions {
        WorkerPoolOptions {
            worker_count: self.workers,
            ..Default::default()
        }
    }

    pub fn notifier(&self, client: &reqwest::Client) -> Arc<dyn Notifier> {
        match &self.notify_webhook {
            Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url.clone())),
            None => Arc::new(TracingNotifier),
        }
    }

    pub async fn store(&self) -> Result<Arc<InMemoryAllocationStore>> {
        match &self.allocations {
            Some(path) => allocations::load(path).await,
            None => Ok(Arc::new(InMemoryAllocationStore::new())),
        }
    }

    pub async fn save(&self, store: &InMemoryAllocationStore) -> Result<()> {
        match &self.allocations {
            Some(path) => allocations::save(store, path).await,
            None => Ok(()),
        }
    }
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("nese/", env!("CARGO_PKG_VERSION")))
        .build()
        .context(HttpClientSnafu)
}

/// Build a pipeline over `store` talking to `backends`.
pub fn new_pipeline(
    profile: &ProfileArgs,
    args: &PipelineArgs,
    store: Arc<InMemoryAllocationStore>,
    backends: BackendRegistry,
    notifier: Arc<dyn Notifier>,
) -> Pipeline {
    Pipeline::new(
        store,
        backends,
        Arc::new(InMemoryTaskGroupBus::new()),
        notifier,
        Arc::new(StaticProfileSource::new(profile.raw_profile())),
        args.options(),
    )
}
