use nese_observability::ErrorKind;
use nese_resources::{AllocationId, AttributeName};
use snafu::Snafu;

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum AllocationStoreError {
    #[snafu(display("allocation not found: {id}"))]
    NotFound { id: AllocationId },
    #[snafu(display("invalid value for attribute {name}: {message}"))]
    InvalidAttribute {
        name: AttributeName,
        message: String,
    },
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = AllocationStoreError> = ::std::result::Result<T, E>;

impl AllocationStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AllocationStoreError::NotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidAttribute { .. } => ErrorKind::Validation,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
