//! In-memory storage backend.
//!
//! Records users, buckets and bucket settings in process memory. Failures
//! can be injected per operation and every call is counted, which lets
//! tests assert on the side effects a pipeline run performed.

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use nese_resources::{BackendProfile, BucketName, EndpointFlavor, Quota, UserResult};
use tracing::debug;

use crate::{
    QuotaRequest, StorageBackend,
    documents::{CorsConfiguration, PolicyDocument, QUOTA_TAG, derive_user_secret},
    error::{BackendError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendOperation {
    CreateUser,
    CreateBucket,
    ApplyAccessPolicy,
    ApplyCors,
    SetQuota,
    GetQuota,
}

impl BackendOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateUser => "create user",
            Self::CreateBucket => "create bucket",
            Self::ApplyAccessPolicy => "apply access policy",
            Self::ApplyCors => "apply cors",
            Self::SetQuota => "set bucket quota",
            Self::GetQuota => "get bucket quota",
        }
    }
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything recorded about one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketState {
    pub policy: Option<PolicyDocument>,
    pub cors: Option<CorsConfiguration>,
    pub quota: Option<Quota>,
    pub tags: BTreeMap<String, String>,
}

pub struct InMemoryBackend {
    flavor: EndpointFlavor,
    supports_cors: bool,
    supports_quota_read: bool,
    next_key: AtomicU64,
    users: DashMap<String, UserResult>,
    buckets: DashMap<BucketName, BucketState>,
    failures: DashMap<BackendOperation, String>,
    delays: DashMap<BackendOperation, Duration>,
    calls: DashMap<BackendOperation, usize>,
}

impl InMemoryBackend {
    /// Create a backend serving `flavor` with that flavor's capabilities.
    pub fn new(flavor: EndpointFlavor) -> Self {
        let (supports_cors, supports_quota_read) = match flavor {
            EndpointFlavor::Rgw => (true, false),
            EndpointFlavor::Minio => (false, true),
        };

        Self {
            flavor,
            supports_cors,
            supports_quota_read,
            next_key: AtomicU64::new(1),
            users: DashMap::new(),
            buckets: DashMap::new(),
            failures: DashMap::new(),
            delays: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, supports_cors: bool, supports_quota_read: bool) -> Self {
        self.supports_cors = supports_cors;
        self.supports_quota_read = supports_quota_read;
        self
    }

    /// Make every later call to `operation` fail with `message`.
    pub fn fail_on(&self, operation: BackendOperation, message: impl Into<String>) {
        self.failures.insert(operation, message.into());
    }

    pub fn clear_failure(&self, operation: BackendOperation) {
        self.failures.remove(&operation);
    }

    /// Make every later call to `operation` take `delay` before it runs.
    pub fn delay_on(&self, operation: BackendOperation, delay: Duration) {
        self.delays.insert(operation, delay);
    }

    /// Number of calls made to `operation`, including failed ones.
    pub fn call_count(&self, operation: BackendOperation) -> usize {
        self.calls.get(&operation).map(|c| *c).unwrap_or_default()
    }

    pub fn user(&self, name: &str) -> Option<UserResult> {
        self.users.get(name).map(|u| u.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn bucket(&self, bucket: &BucketName) -> Option<BucketState> {
        self.buckets.get(bucket).map(|b| b.value().clone())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Overwrite the quota recorded on a bucket, creating the bucket if needed.
    ///
    /// Simulates a change made outside the pipeline.
    pub fn set_recorded_quota(&self, bucket: &BucketName, quota: Quota) {
        let mut state = self.buckets.entry(bucket.clone()).or_default();
        state.quota = Some(quota);
        state
            .tags
            .insert(QUOTA_TAG.to_string(), quota.terabytes().to_string());
    }

    async fn record(&self, operation: BackendOperation) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;

        let delay = self.delays.get(&operation).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.failures.get(&operation) {
            Some(message) => Err(BackendError::Provisioning {
                operation: operation.as_str(),
                message: message.value().clone(),
            }),
            None => Ok(()),
        }
    }

    fn missing_bucket(operation: BackendOperation, bucket: &BucketName) -> BackendError {
        BackendError::Provisioning {
            operation: operation.as_str(),
            message: format!("NoSuchBucket: {bucket}"),
        }
    }
}

impl fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("flavor", &self.flavor)
            .field("users", &self.users.len())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl StorageBackend for InMemoryBackend {
    fn flavor(&self) -> EndpointFlavor {
        self.flavor
    }

    fn supports_cors(&self) -> bool {
        self.supports_cors
    }

    fn supports_quota_read(&self) -> bool {
        self.supports_quota_read
    }

    async fn create_user(&self, name: &str, profile: &BackendProfile) -> Result<UserResult> {
        self.record(BackendOperation::CreateUser).await?;

        if let Some(existing) = self.users.get(name) {
            debug!(user = name, "user already exists");
            return Ok(existing.value().clone());
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let user = UserResult {
            uid: name.to_string(),
            access_key: format!("NESEAK{key:014}"),
            secret_key: derive_user_secret(profile.secret_key(), name)?,
        };

        Ok(self
            .users
            .entry(name.to_string())
            .or_insert(user)
            .value()
            .clone())
    }

    async fn create_bucket(&self, bucket: &BucketName, _profile: &BackendProfile) -> Result<bool> {
        self.record(BackendOperation::CreateBucket).await?;
        self.buckets.entry(bucket.clone()).or_default();
        Ok(true)
    }

    async fn apply_access_policy(
        &self,
        bucket: &BucketName,
        principal: &str,
        _profile: &BackendProfile,
    ) -> Result<()> {
        let operation = BackendOperation::ApplyAccessPolicy;
        self.record(operation).await?;

        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(operation, bucket))?;
        state.policy = Some(PolicyDocument::bucket_policy(bucket.as_str(), principal));
        Ok(())
    }

    async fn apply_cors(&self, bucket: &BucketName, _profile: &BackendProfile) -> Result<()> {
        let operation = BackendOperation::ApplyCors;
        self.record(operation).await?;

        if !self.supports_cors {
            return Ok(());
        }

        let mut state = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(operation, bucket))?;
        state.cors = Some(CorsConfiguration::default());
        Ok(())
    }

    async fn set_quota(&self, request: &QuotaRequest, _profile: &BackendProfile) -> Result<()> {
        let operation = BackendOperation::SetQuota;
        self.record(operation).await?;

        let mut state = self
            .buckets
            .get_mut(&request.bucket_name)
            .ok_or_else(|| Self::missing_bucket(operation, &request.bucket_name))?;
        state.quota = Some(request.quota);
        state.tags = request.labels.clone();
        state
            .tags
            .insert(QUOTA_TAG.to_string(), request.quota.terabytes().to_string());
        Ok(())
    }

    async fn get_quota(&self, bucket: &BucketName, _profile: &BackendProfile) -> Result<Quota> {
        let operation = BackendOperation::GetQuota;
        self.record(operation).await?;

        if !self.supports_quota_read {
            return Err(BackendError::Unsupported {
                operation: operation.as_str(),
                flavor: self.flavor,
            });
        }

        let state = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(operation, bucket))?;
        state.quota.ok_or_else(|| BackendError::Decode {
            operation: operation.as_str(),
            message: format!("bucket {bucket} has no quota tag"),
        })
    }
}

#[cfg(test)]
mod tests {
    use nese_resources::RawProfile;

    use super::*;

    fn profile() -> BackendProfile {
        BackendProfile::try_from_raw(RawProfile::new("minio", "localhost", "admin", "secret"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_user_twice_returns_same_credentials() {
        let backend = InMemoryBackend::new(EndpointFlavor::Minio);

        let first = backend.create_user("b_datamanager", &profile()).await.unwrap();
        let second = backend.create_user("b_datamanager", &profile()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.user_count(), 1);
        assert_eq!(backend.call_count(BackendOperation::CreateUser), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let backend = InMemoryBackend::new(EndpointFlavor::Minio);
        backend.fail_on(BackendOperation::CreateBucket, "quota exceeded");

        let bucket = BucketName::new("lab-data").unwrap();
        let err = backend.create_bucket(&bucket, &profile()).await.unwrap_err();

        assert_eq!(err.to_string(), "create bucket failed: quota exceeded");
        assert_eq!(backend.bucket_count(), 0);

        backend.clear_failure(BackendOperation::CreateBucket);
        assert!(backend.create_bucket(&bucket, &profile()).await.unwrap());
        assert_eq!(backend.call_count(BackendOperation::CreateBucket), 2);
    }

    #[tokio::test]
    async fn test_quota_round_trip_and_capabilities() {
        let bucket = BucketName::new("lab-data").unwrap();

        let minio = InMemoryBackend::new(EndpointFlavor::Minio);
        minio.create_bucket(&bucket, &profile()).await.unwrap();
        minio
            .set_quota(
                &QuotaRequest::new(bucket.clone(), Quota::from_terabytes(10)).with_label("pi", "jdoe"),
                &profile(),
            )
            .await
            .unwrap();
        assert_eq!(
            minio.get_quota(&bucket, &profile()).await.unwrap(),
            Quota::from_terabytes(10)
        );
        assert_eq!(minio.bucket(&bucket).unwrap().tags["pi"], "jdoe");

        let rgw = InMemoryBackend::new(EndpointFlavor::Rgw);
        rgw.create_bucket(&bucket, &profile()).await.unwrap();
        assert!(rgw.get_quota(&bucket, &profile()).await.unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn test_policy_requires_bucket() {
        let backend = InMemoryBackend::new(EndpointFlavor::Rgw);
        let bucket = BucketName::new("lab-data").unwrap();

        assert!(
            backend
                .apply_access_policy(&bucket, "user", &profile())
                .await
                .is_err()
        );

        backend.create_bucket(&bucket, &profile()).await.unwrap();
        backend
            .apply_access_policy(&bucket, "user", &profile())
            .await
            .unwrap();
        backend.apply_cors(&bucket, &profile()).await.unwrap();

        let state = backend.bucket(&bucket).unwrap();
        assert_eq!(state.policy.unwrap().statement.len(), 2);
        assert!(state.cors.is_some());
    }
}
