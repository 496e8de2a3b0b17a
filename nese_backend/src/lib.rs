//! Storage backends driven by the provisioning pipeline.
//!
//! This crate provides the `StorageBackend` trait, one capability contract
//! implemented once per endpoint flavor, and the `BackendRegistry` used to
//! pick the implementation matching a run's `BackendProfile`.
//!
//! The production adapters talk to a Ceph RADOS gateway through its signed
//! admin and S3 APIs (`RgwBackend`) and to MinIO through the `mc` client
//! (`MinioBackend`). `InMemoryBackend` records every side effect and is used
//! by tests and the development service.

pub mod documents;
mod error;
pub mod memory;
pub mod minio;
pub mod rgw;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use nese_resources::{BackendProfile, BucketName, EndpointFlavor, Quota, UserResult};

pub use self::{
    error::{BackendError, Result},
    memory::{BackendOperation, InMemoryBackend},
    minio::{CommandOutput, CommandRunner, McCommandRunner, MinioBackend},
    rgw::RgwBackend,
};

/// A quota update for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRequest {
    pub bucket_name: BucketName,
    pub quota: Quota,
    /// Extra descriptive labels. Backends that record the quota as bucket
    /// tags store them next to it.
    pub labels: BTreeMap<String, String>,
}

impl QuotaRequest {
    pub fn new(bucket_name: BucketName, quota: Quota) -> Self {
        Self {
            bucket_name,
            quota,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Capability contract of a storage endpoint flavor.
///
/// Every operation receives the profile of the current run and must not
/// cache it. Creation operations are idempotent: creating an identity or a
/// bucket that already exists and belongs to the caller succeeds.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    fn flavor(&self) -> EndpointFlavor;

    /// Whether `apply_cors` does anything on this flavor.
    fn supports_cors(&self) -> bool {
        true
    }

    /// Whether `get_quota` can read back the quota of a bucket.
    fn supports_quota_read(&self) -> bool {
        true
    }

    /// Create the identity `name`, or return the credentials of the existing one.
    async fn create_user(&self, name: &str, profile: &BackendProfile) -> Result<UserResult>;

    async fn create_bucket(&self, bucket: &BucketName, profile: &BackendProfile) -> Result<bool>;

    /// Grant `principal` read/write access and everyone read access to `bucket`.
    async fn apply_access_policy(
        &self,
        bucket: &BucketName,
        principal: &str,
        profile: &BackendProfile,
    ) -> Result<()>;

    async fn apply_cors(&self, bucket: &BucketName, profile: &BackendProfile) -> Result<()>;

    async fn set_quota(&self, request: &QuotaRequest, profile: &BackendProfile) -> Result<()>;

    async fn get_quota(&self, bucket: &BucketName, profile: &BackendProfile) -> Result<Quota>;
}

/// Storage backends keyed by the flavor they serve.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<EndpointFlavor, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the network backends for every flavor.
    pub fn production(client: reqwest::Client) -> Self {
        Self::new()
            .with_backend(Arc::new(RgwBackend::new(client)))
            .with_backend(Arc::new(MinioBackend::new(Arc::new(
                McCommandRunner::default(),
            ))))
    }

    /// Register `backend` under the flavor it reports, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(backend.flavor(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, flavor: EndpointFlavor) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(&flavor)
            .cloned()
            .ok_or(BackendError::UnregisteredFlavor { flavor })
    }

    pub fn flavors(&self) -> impl Iterator<Item = EndpointFlavor> + '_ {
        self.backends.keys().copied()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut flavors: Vec<_> = self.flavors().collect();
        flavors.sort();
        f.debug_struct("BackendRegistry")
            .field("flavors", &flavors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(InMemoryBackend::new(EndpointFlavor::Minio)));

        assert_eq!(
            registry.get(EndpointFlavor::Minio).unwrap().flavor(),
            EndpointFlavor::Minio
        );

        let err = registry.get(EndpointFlavor::Rgw).err().unwrap();
        assert!(matches!(
            err,
            BackendError::UnregisteredFlavor {
                flavor: EndpointFlavor::Rgw
            }
        ));
        assert_eq!(err.kind(), nese_observability::ErrorKind::Configuration);
    }

    #[test]
    fn test_production_registry_covers_all_flavors() {
        let registry = BackendRegistry::production(reqwest::Client::new());

        for flavor in EndpointFlavor::ALL {
            assert_eq!(registry.get(flavor).unwrap().flavor(), flavor);
        }
    }
}
