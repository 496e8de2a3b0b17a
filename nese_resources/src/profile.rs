use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Signing region used when the profile does not specify one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors raised while validating a backend profile.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ProfileError {
    #[snafu(display("unrecognized endpoint type: {value}"))]
    UnknownFlavor { value: String },
    #[snafu(display("unrecognized endpoint scheme: {value}"))]
    UnknownScheme { value: String },
    #[snafu(display("required profile values are missing: {}", fields.join(",")))]
    MissingFields { fields: Vec<&'static str> },
}

pub type ProfileResult<T, E = ProfileError> = ::std::result::Result<T, E>;

/// The admin surface exposed by a storage endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointFlavor {
    /// Ceph RADOS gateway, driven through its admin API and S3 API.
    Rgw,
    /// MinIO, driven through the `mc` admin client.
    Minio,
}

impl EndpointFlavor {
    pub const ALL: [EndpointFlavor; 2] = [EndpointFlavor::Rgw, EndpointFlavor::Minio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgw => "rgw",
            Self::Minio => "minio",
        }
    }

    /// Whether the flavor needs the owner uid to manage bucket quotas.
    pub fn requires_uid(&self) -> bool {
        matches!(self, Self::Rgw)
    }
}

impl FromStr for EndpointFlavor {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgw" => Ok(Self::Rgw),
            "minio" => Ok(Self::Minio),
            _ => Err(ProfileError::UnknownFlavor {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EndpointFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    Http,
    Https,
}

impl UrlScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Https)
    }
}

impl FromStr for UrlScheme {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(ProfileError::UnknownScheme {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated profile values, as read from configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RawProfile {
    pub endpoint_host: Option<String>,
    pub endpoint_flavor: Option<String>,
    pub url_scheme: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub uid: Option<String>,
    pub region: Option<String>,
}

/// Connection and credential information for one storage endpoint.
///
/// A profile is validated once and then never changes. It is built fresh for
/// every pipeline run so that rotated credentials are picked up.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendProfile {
    endpoint_host: String,
    flavor: EndpointFlavor,
    scheme: UrlScheme,
    access_key: String,
    secret_key: String,
    uid: Option<String>,
    region: String,
}

impl BackendProfile {
    /// Validate raw configuration values into a profile.
    ///
    /// Every absent required field is reported at once.
    pub fn try_from_raw(raw: RawProfile) -> ProfileResult<Self> {
        let flavor = raw
            .endpoint_flavor
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(EndpointFlavor::from_str)
            .transpose()?;

        let scheme = raw
            .url_scheme
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(UrlScheme::from_str)
            .transpose()?;

        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

        let mut missing = Vec::new();
        if flavor.is_none() {
            missing.push("endpoint_flavor");
        }
        if scheme.is_none() {
            missing.push("url_scheme");
        }
        if !present(&raw.endpoint_host) {
            missing.push("endpoint_host");
        }
        if !present(&raw.access_key) {
            missing.push("access_key");
        }
        if !present(&raw.secret_key) {
            missing.push("secret_key");
        }
        if flavor.is_some_and(|f| f.requires_uid()) && !present(&raw.uid) {
            missing.push("uid");
        }

        match (flavor, scheme, raw.endpoint_host, raw.access_key, raw.secret_key) {
            (Some(flavor), Some(scheme), Some(endpoint_host), Some(access_key), Some(secret_key))
                if missing.is_empty() =>
            {
                Ok(Self {
                    endpoint_host,
                    flavor,
                    scheme,
                    access_key,
                    secret_key,
                    uid: raw.uid.filter(|v| !v.is_empty()),
                    region: raw
                        .region
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                })
            }
            _ => Err(ProfileError::MissingFields { fields: missing }),
        }
    }

    pub fn endpoint_host(&self) -> &str {
        &self.endpoint_host
    }

    pub fn flavor(&self) -> EndpointFlavor {
        self.flavor
    }

    pub fn scheme(&self) -> UrlScheme {
        self.scheme
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Base URL of the endpoint, e.g. `https://s3.example.org`.
    pub fn endpoint_url(&self) -> String {
        format!("{}://{}", self.scheme, self.endpoint_host)
    }
}

impl RawProfile {
    pub fn new(
        flavor: impl Into<String>,
        endpoint_host: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_host: Some(endpoint_host.into()),
            endpoint_flavor: Some(flavor.into()),
            url_scheme: Some(UrlScheme::Https.to_string()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            uid: None,
            region: None,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.url_scheme = Some(scheme.into());
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() { "<redacted>" } else { "<unset>" }
}

impl fmt::Debug for RawProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawProfile")
            .field("endpoint_host", &self.endpoint_host)
            .field("endpoint_flavor", &self.endpoint_flavor)
            .field("url_scheme", &self.url_scheme)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("uid", &self.uid)
            .field("region", &self.region)
            .finish()
    }
}

impl fmt::Debug for BackendProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendProfile")
            .field("endpoint_host", &self.endpoint_host)
            .field("flavor", &self.flavor)
            .field("scheme", &self.scheme)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("uid", &self.uid)
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_rgw_profile() {
        let raw = RawProfile::new("rgw", "s3.example.org", "admin", "secret").with_uid("owner");
        let profile = BackendProfile::try_from_raw(raw).unwrap();

        assert_eq!(profile.flavor(), EndpointFlavor::Rgw);
        assert_eq!(profile.endpoint_url(), "https://s3.example.org");
        assert_eq!(profile.uid(), Some("owner"));
        assert_eq!(profile.region(), DEFAULT_REGION);
    }

    #[test]
    fn test_minio_profile_does_not_need_uid() {
        let raw = RawProfile::new("minio", "minio.local:9000", "admin", "secret").with_scheme("http");
        let profile = BackendProfile::try_from_raw(raw).unwrap();

        assert_eq!(profile.flavor(), EndpointFlavor::Minio);
        assert_eq!(profile.endpoint_url(), "http://minio.local:9000");
        assert_eq!(profile.uid(), None);
    }

    #[test]
    fn test_unknown_flavor_and_scheme() {
        let raw = RawProfile::new("mino", "host", "a", "s");
        assert_eq!(
            BackendProfile::try_from_raw(raw),
            Err(ProfileError::UnknownFlavor {
                value: "mino".to_string()
            })
        );

        let raw = RawProfile::new("minio", "host", "a", "s").with_scheme("ftp");
        assert_eq!(
            BackendProfile::try_from_raw(raw),
            Err(ProfileError::UnknownScheme {
                value: "ftp".to_string()
            })
        );
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let raw = RawProfile {
            endpoint_flavor: Some("rgw".to_string()),
            url_scheme: Some("https".to_string()),
            endpoint_host: Some(String::new()),
            ..Default::default()
        };

        let err = BackendProfile::try_from_raw(raw).unwrap_err();
        assert_eq!(
            err,
            ProfileError::MissingFields {
                fields: vec!["endpoint_host", "access_key", "secret_key", "uid"]
            }
        );
        assert_eq!(
            err.to_string(),
            "required profile values are missing: endpoint_host,access_key,secret_key,uid"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let raw = RawProfile::new("minio", "host", "admin", "topsecret");
        let profile = BackendProfile::try_from_raw(raw.clone()).unwrap();

        assert!(!format!("{raw:?}").contains("topsecret"));
        assert!(!format!("{profile:?}").contains("topsecret"));
    }
}
