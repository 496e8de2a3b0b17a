//! Per-run construction of the backend profile.

use std::sync::{Arc, RwLock};

use nese_resources::{BackendProfile, EndpointFlavor, ProfileResult, RawProfile, UrlScheme};

pub const NESE_ENDPOINT: &str = "NESE_ENDPOINT";
pub const NESE_ENDPOINT_TYPE: &str = "NESE_ENDPOINT_TYPE";
pub const NESE_ENDPOINT_SCHEME: &str = "NESE_ENDPOINT_SCHEME";
pub const NESE_ENDPOINT_ACCESS_KEY: &str = "NESE_ENDPOINT_ACCESS_KEY";
pub const NESE_ENDPOINT_SECRET_KEY: &str = "NESE_ENDPOINT_SECRET_KEY";
pub const NESE_ENDPOINT_UID: &str = "NESE_ENDPOINT_UID";
pub const NESE_ENDPOINT_REGION: &str = "NESE_ENDPOINT_REGION";

/// Source of the backend profile.
///
/// The pipeline asks for a fresh profile at the start of every run, so
/// configuration changes apply to the next run without a restart.
pub trait ProfileSource: Send + Sync {
    fn raw_profile(&self) -> RawProfile;

    /// Build and validate the profile.
    fn load(&self) -> ProfileResult<BackendProfile> {
        BackendProfile::try_from_raw(self.raw_profile())
    }
}

/// A profile fixed at construction time, replaceable at runtime.
#[derive(Debug, Clone)]
pub struct StaticProfileSource {
    raw: Arc<RwLock<RawProfile>>,
}

impl StaticProfileSource {
    pub fn new(raw: RawProfile) -> Self {
        Self {
            raw: Arc::new(RwLock::new(raw)),
        }
    }

    /// Replace the profile handed to later runs.
    pub fn replace(&self, raw: RawProfile) {
        *self.raw.write().unwrap_or_else(|err| err.into_inner()) = raw;
    }
}

impl ProfileSource for StaticProfileSource {
    fn raw_profile(&self) -> RawProfile {
        self.raw
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

/// Reads the `NESE_ENDPOINT*` environment variables on every call.
///
/// The endpoint type defaults to `rgw` and the scheme to `https`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProfileSource;

impl ProfileSource for EnvProfileSource {
    fn raw_profile(&self) -> RawProfile {
        let var = |name: &str| std::env::var(name).ok();

        RawProfile {
            endpoint_host: var(NESE_ENDPOINT),
            endpoint_flavor: var(NESE_ENDPOINT_TYPE)
                .or_else(|| Some(EndpointFlavor::Rgw.to_string())),
            url_scheme: var(NESE_ENDPOINT_SCHEME).or_else(|| Some(UrlScheme::Https.to_string())),
            access_key: var(NESE_ENDPOINT_ACCESS_KEY),
            secret_key: var(NESE_ENDPOINT_SECRET_KEY),
            uid: var(NESE_ENDPOINT_UID),
            region: var(NESE_ENDPOINT_REGION),
        }
    }
}
