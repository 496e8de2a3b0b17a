use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{BucketName, Quota};

/// Correlation id shared by the tasks of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskGroupId(Ulid);

impl TaskGroupId {
    /// Generate a fresh group id.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity and credentials of a bucket management user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResult {
    pub uid: String,
    pub access_key: String,
    pub secret_key: String,
}

/// A provisioned bucket and the quota it was provisioned with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketResult {
    pub bucket_name: BucketName,
    pub quota: Quota,
}

/// Tag used by downstream steps to select results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultTag {
    User,
    Bucket,
}

/// The payload published by a successful provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisioningResult {
    User(UserResult),
    Bucket(BucketResult),
}

impl ProvisioningResult {
    pub fn tag(&self) -> ResultTag {
        match self {
            Self::User(_) => ResultTag::User,
            Self::Bucket(_) => ResultTag::Bucket,
        }
    }

    pub fn as_user(&self) -> Option<&UserResult> {
        match self {
            Self::User(user) => Some(user),
            Self::Bucket(_) => None,
        }
    }

    pub fn as_bucket(&self) -> Option<&BucketResult> {
        match self {
            Self::Bucket(bucket) => Some(bucket),
            Self::User(_) => None,
        }
    }
}

impl From<UserResult> for ProvisioningResult {
    fn from(value: UserResult) -> Self {
        Self::User(value)
    }
}

impl From<BucketResult> for ProvisioningResult {
    fn from(value: BucketResult) -> Self {
        Self::Bucket(value)
    }
}

impl fmt::Debug for UserResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserResult")
            .field("uid", &self.uid)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
