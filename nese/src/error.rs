use std::path::PathBuf;

use nese_allocation::AllocationStoreError;
use nese_observability::{ErrorKind, ObservabilityError};
use nese_provisioner::ProvisionerError;
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Failed provisioner operation {operation}"))]
    Provisioner {
        operation: &'static str,
        source: ProvisionerError,
    },
    #[snafu(display("Failed allocation store operation {operation}"))]
    AllocationStore {
        operation: &'static str,
        source: AllocationStoreError,
    },
    #[snafu(display("Failed to access allocations file {}", path.display()))]
    AllocationsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid allocations file {}", path.display()))]
    AllocationsJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to build HTTP client"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("{failed} of {total} {operation} failed"))]
    Failed {
        operation: &'static str,
        failed: usize,
        total: usize,
    },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Observability { .. } | Self::HttpClient { .. } => ErrorKind::Configuration,
            Self::Provisioner { source, .. } => source.kind(),
            Self::AllocationStore { source, .. } => source.kind(),
            Self::AllocationsFile { .. } => ErrorKind::NotFound,
            Self::AllocationsJson { .. } => ErrorKind::Validation,
            Self::Failed { .. } => ErrorKind::Internal,
        }
    }
}
