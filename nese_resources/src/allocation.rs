use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};

/// Identifier of an allocation owned by the allocation-management system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AllocationId(u64);

impl AllocationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for AllocationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for AllocationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an allocation.
///
/// Only `ProvisioningError` is ever written by the provisioner, the other
/// states are owned by the allocation-management system.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStatus {
    #[default]
    New,
    Active,
    ProvisioningError,
    Inactive,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Active => "Active",
            Self::ProvisioningError => "Provisioning Error",
            Self::Inactive => "Inactive",
        };
        f.write_str(name)
    }
}

/// Declared scalar kind of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Text,
    Int,
}

/// The allocation attribute types read and written by the provisioner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttributeName {
    /// Desired (and, once provisioned, actual) bucket name.
    BucketName,
    /// Access key of the bucket management user.
    AccessKey,
    /// Secret key of the bucket management user.
    SecretKey,
    /// Bucket quota, in terabytes.
    Quota,
}

impl AttributeName {
    pub const ALL: [AttributeName; 4] = [
        AttributeName::BucketName,
        AttributeName::AccessKey,
        AttributeName::SecretKey,
        AttributeName::Quota,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BucketName => "bucket_name",
            Self::AccessKey => "access_key",
            Self::SecretKey => "secret_key",
            Self::Quota => "quota",
        }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Quota => AttributeKind::Int,
            Self::BucketName | Self::AccessKey | Self::SecretKey => AttributeKind::Text,
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed attribute value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Text(String),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Text(_) => AttributeKind::Text,
            Self::Int(_) => AttributeKind::Int,
        }
    }

    /// Returns the value as text, formatting integers.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Int(value) => value.to_string(),
        }
    }

    /// Returns the value as an unsigned integer.
    ///
    /// Text values are parsed, since stores often keep every attribute as text.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(value) => u64::try_from(*value).ok(),
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "Int({value})"),
            Self::Text(value) => write!(f, "Text({value:?})"),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// An allocation as seen by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    /// Human readable description of the allocation.
    pub description: String,
    pub project_title: String,
    pub project_pi: String,
    /// Descriptions of the resources the allocation was granted on.
    pub resources: Vec<String>,
    /// Granted quantity, used as the quota when no quota attribute exists.
    pub quantity: u64,
    pub status: AllocationStatus,
}

impl Allocation {
    pub fn new(id: AllocationId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            project_title: String::new(),
            project_pi: String::new(),
            resources: Vec::new(),
            quantity: 0,
            status: AllocationStatus::default(),
        }
    }

    pub fn with_project(mut self, title: impl Into<String>, pi: impl Into<String>) -> Self {
        self.project_title = title.into();
        self.project_pi = pi.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_status(mut self, status: AllocationStatus) -> Self {
        self.status = status;
        self
    }

    /// Name of the parent resource, the first resource the allocation was granted on.
    pub fn parent_resource(&self) -> Option<&str> {
        self.resources.first().map(String::as_str)
    }

    pub fn has_resource(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_kinds() {
        assert_eq!(AttributeName::Quota.kind(), AttributeKind::Int);
        assert_eq!(AttributeName::SecretKey.kind(), AttributeKind::Text);
        assert_eq!(AttributeName::BucketName.as_str(), "bucket_name");
    }

    #[test]
    fn test_attribute_value_as_u64() {
        assert_eq!(AttributeValue::Int(10).as_u64(), Some(10));
        assert_eq!(AttributeValue::text(" 12 ").as_u64(), Some(12));
        assert_eq!(AttributeValue::Int(-1).as_u64(), None);
        assert_eq!(AttributeValue::text("ten").as_u64(), None);
    }

    #[test]
    fn test_allocation_resources() {
        let allocation = Allocation::new(AllocationId::new(7), "lab storage")
            .with_resource("NESE S3 Allocation")
            .with_resource("Cluster");

        assert_eq!(allocation.parent_resource(), Some("NESE S3 Allocation"));
        assert!(allocation.has_resource("Cluster"));
        assert!(!allocation.has_resource("Tape"));
    }
}
