//! Shared data model for the NESE bucket provisioner.
//!
//! The types in this crate are the vocabulary spoken between the allocation
//! store, the storage backends, and the provisioning pipeline.

mod allocation;
mod bucket;
mod profile;
mod provisioning;
mod quota;

pub use self::{
    allocation::{
        Allocation, AllocationId, AllocationStatus, AttributeKind, AttributeName, AttributeValue,
    },
    bucket::{BucketName, BucketNameError, management_user_name},
    profile::{
        BackendProfile, DEFAULT_REGION, EndpointFlavor, ProfileError, ProfileResult, RawProfile,
        UrlScheme,
    },
    provisioning::{BucketResult, ProvisioningResult, ResultTag, TaskGroupId, UserResult},
    quota::{KILOBYTES_PER_TERABYTE, Quota, QuotaError},
};
