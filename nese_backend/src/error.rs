use std::time::Duration;

use nese_observability::ErrorKind;
use nese_resources::{EndpointFlavor, QuotaError};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("{operation} failed: {message}"))]
    Provisioning {
        operation: &'static str,
        message: String,
    },
    #[snafu(display("{operation} request failed"))]
    Request {
        operation: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to build {operation} request: {message}"))]
    InvalidRequest {
        operation: &'static str,
        message: String,
    },
    #[snafu(display("failed to sign {operation} request: {message}"))]
    Signing {
        operation: &'static str,
        message: String,
    },
    #[snafu(display("failed to run mc {command}"))]
    Command {
        command: String,
        source: std::io::Error,
    },
    #[snafu(display("mc {command} did not finish within {timeout:?}"))]
    CommandTimeout { command: String, timeout: Duration },
    #[snafu(display("failed to encode {document}: {message}"))]
    Encode {
        document: &'static str,
        message: String,
    },
    #[snafu(display("failed to decode {operation} response: {message}"))]
    Decode {
        operation: &'static str,
        message: String,
    },
    #[snafu(display("{operation} is not supported by {flavor} endpoints"))]
    Unsupported {
        operation: &'static str,
        flavor: EndpointFlavor,
    },
    #[snafu(display("invalid quota"))]
    InvalidQuota { source: QuotaError },
    #[snafu(display("{operation} requires the profile owner uid"))]
    MissingUid { operation: &'static str },
    #[snafu(display("no backend registered for flavor {flavor}"))]
    UnregisteredFlavor { flavor: EndpointFlavor },
}

pub type Result<T, E = BackendError> = ::std::result::Result<T, E>;

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provisioning { .. } | Self::Decode { .. } => ErrorKind::Internal,
            Self::Request { .. } | Self::Command { .. } | Self::CommandTimeout { .. } => {
                ErrorKind::Temporary
            }
            Self::InvalidRequest { .. } | Self::Signing { .. } | Self::Encode { .. } => {
                ErrorKind::Internal
            }
            Self::InvalidQuota { .. } => ErrorKind::Validation,
            Self::Unsupported { .. }
            | Self::MissingUid { .. }
            | Self::UnregisteredFlavor { .. } => ErrorKind::Configuration,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
