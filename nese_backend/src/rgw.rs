//! Ceph RADOS gateway backend.
//!
//! Users and quotas go through the gateway admin API (`/admin/user`,
//! `/admin/bucket`), buckets, policies and CORS through the S3 API. Every
//! request is signed with AWS SigV4 using the profile's admin credentials.

use http::{Method, StatusCode, header};
use nese_resources::{BackendProfile, BucketName, EndpointFlavor, Quota, UserResult};
use reqsign::{AwsCredential, AwsV4Signer};
use reqwest::Url;
use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    QuotaRequest, StorageBackend,
    documents::{CorsConfiguration, PolicyDocument, content_md5, payload_sha256},
    error::{BackendError, InvalidQuotaSnafu, RequestSnafu, Result},
};

const USER_ALREADY_EXISTS: &str = "UserAlreadyExists";
const BUCKET_ALREADY_OWNED: &str = "BucketAlreadyOwnedByYou";
const PLACEHOLDER_EMAIL: &str = "unknown@unknown.org";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Backend for Ceph RADOS gateways.
#[derive(Debug, Clone)]
pub struct RgwBackend {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AdminUser {
    #[serde(default)]
    keys: Vec<AdminUserKey>,
}

#[derive(Debug, Deserialize)]
struct AdminUserKey {
    access_key: String,
    secret_key: String,
}

/// Error document returned by the gateway, as JSON (admin API) or XML (S3 API).
#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
struct RgwError {
    code: String,
    message: String,
    request_id: String,
}

struct RgwResponse {
    status: StatusCode,
    body: String,
}

impl RgwResponse {
    fn error(&self) -> RgwError {
        parse_error(&self.body)
    }

    fn diagnostic(&self) -> String {
        let error = self.error();
        if error.code.is_empty() {
            format!("{}: {}", self.status, self.body.trim())
        } else if error.message.is_empty() {
            format!("{}: {}", self.status, error.code)
        } else {
            format!("{}: {} ({})", self.status, error.code, error.message)
        }
    }
}

fn parse_error(body: &str) -> RgwError {
    serde_json::from_str(body)
        .ok()
        .or_else(|| quick_xml::de::from_str(body).ok())
        .unwrap_or_default()
}

impl RgwBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Vec<u8>,
        content_type: Option<&'static str>,
        profile: &BackendProfile,
    ) -> Result<RgwResponse> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(url.as_str())
            .header(X_AMZ_CONTENT_SHA256, payload_sha256(&body));

        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
            builder = builder.header("Content-MD5", content_md5(&body));
        }

        let mut request = builder
            .body(body)
            .map_err(|err| BackendError::InvalidRequest {
                operation,
                message: err.to_string(),
            })?;

        let signer = AwsV4Signer::new("s3", profile.region());
        let credential = AwsCredential {
            access_key_id: profile.access_key().to_string(),
            secret_access_key: profile.secret_key().to_string(),
            ..Default::default()
        };
        signer
            .sign(&mut request, &credential)
            .map_err(|err| BackendError::Signing {
                operation,
                message: err.to_string(),
            })?;
        // reqwest sets the host header from the url.
        request.headers_mut().remove(header::HOST);

        let request = reqwest::Request::try_from(request).context(RequestSnafu { operation })?;

        debug!(operation, url = %url, "sending gateway request");

        let response = self
            .client
            .execute(request)
            .await
            .context(RequestSnafu { operation })?;
        let status = response.status();
        let body = response.text().await.context(RequestSnafu { operation })?;

        debug!(operation, status = %status, "gateway responded");

        Ok(RgwResponse { status, body })
    }

    async fn get_user(&self, name: &str, profile: &BackendProfile) -> Result<UserResult> {
        let operation = "get user";
        let response = self
            .send(
                operation,
                Method::GET,
                get_user_url(profile, name)?,
                Vec::new(),
                None,
                profile,
            )
            .await?;

        if !response.status.is_success() {
            return Err(BackendError::Provisioning {
                operation,
                message: response.diagnostic(),
            });
        }

        user_result(operation, name, &response.body)
    }
}

fn base_url(profile: &BackendProfile, operation: &'static str) -> Result<Url> {
    Url::parse(&profile.endpoint_url()).map_err(|err| BackendError::InvalidRequest {
        operation,
        message: format!("invalid endpoint {}: {err}", profile.endpoint_host()),
    })
}

fn create_user_url(profile: &BackendProfile, name: &str) -> Result<Url> {
    let mut url = base_url(profile, "create user")?;
    url.set_path("/admin/user");
    url.query_pairs_mut()
        .append_pair("format", "json")
        .append_pair("uid", name)
        .append_pair("display-name", name)
        .append_pair("email", PLACEHOLDER_EMAIL)
        .append_pair("max-buckets", "-1");
    Ok(url)
}

fn get_user_url(profile: &BackendProfile, name: &str) -> Result<Url> {
    let mut url = base_url(profile, "get user")?;
    url.set_path("/admin/user");
    url.query_pairs_mut()
        .append_pair("format", "json")
        .append_pair("uid", name);
    Ok(url)
}

fn bucket_url(
    profile: &BackendProfile,
    bucket: &BucketName,
    subresource: Option<&str>,
) -> Result<Url> {
    let mut url = base_url(profile, "bucket")?;
    url.set_path(&format!("/{bucket}"));
    url.set_query(subresource);
    Ok(url)
}

fn quota_url(profile: &BackendProfile, uid: &str, bucket: &BucketName, quota: Quota) -> Result<Url> {
    let max_size_kb = quota.to_kilobytes().context(InvalidQuotaSnafu)?;

    let mut url = base_url(profile, "set quota")?;
    url.set_path("/admin/bucket");
    url.query_pairs_mut()
        .append_key_only("quota")
        .append_pair("format", "json")
        .append_pair("uid", uid)
        .append_pair("bucket", bucket.as_str())
        .append_pair("max-size-kb", &max_size_kb.to_string())
        .append_pair("enabled", "true");
    Ok(url)
}

fn user_result(operation: &'static str, name: &str, body: &str) -> Result<UserResult> {
    let user: AdminUser = serde_json::from_str(body).map_err(|err| BackendError::Decode {
        operation,
        message: err.to_string(),
    })?;

    let key = user
        .keys
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Decode {
            operation,
            message: format!("user {name} has no keys"),
        })?;

    Ok(UserResult {
        uid: name.to_string(),
        access_key: key.access_key,
        secret_key: key.secret_key,
    })
}

#[async_trait::async_trait]
impl StorageBackend for RgwBackend {
    fn flavor(&self) -> EndpointFlavor {
        EndpointFlavor::Rgw
    }

    fn supports_quota_read(&self) -> bool {
        false
    }

    async fn create_user(&self, name: &str, profile: &BackendProfile) -> Result<UserResult> {
        let operation = "create user";
        let response = self
            .send(
                operation,
                Method::PUT,
                create_user_url(profile, name)?,
                Vec::new(),
                None,
                profile,
            )
            .await?;

        if response.status.is_success() {
            return user_result(operation, name, &response.body);
        }

        if response.error().code == USER_ALREADY_EXISTS {
            info!(user = name, "user already exists");
            return self.get_user(name, profile).await;
        }

        Err(BackendError::Provisioning {
            operation,
            message: response.diagnostic(),
        })
    }

    async fn create_bucket(&self, bucket: &BucketName, profile: &BackendProfile) -> Result<bool> {
        let operation = "create bucket";
        let response = self
            .send(
                operation,
                Method::PUT,
                bucket_url(profile, bucket, None)?,
                Vec::new(),
                None,
                profile,
            )
            .await?;

        if response.status.is_success() {
            return Ok(true);
        }

        if response.error().code == BUCKET_ALREADY_OWNED {
            info!(bucket = %bucket, "bucket already owned by caller");
            return Ok(true);
        }

        Err(BackendError::Provisioning {
            operation,
            message: response.diagnostic(),
        })
    }

    async fn apply_access_policy(
        &self,
        bucket: &BucketName,
        principal: &str,
        profile: &BackendProfile,
    ) -> Result<()> {
        let operation = "put bucket policy";
        let policy = PolicyDocument::bucket_policy(bucket.as_str(), principal).to_json()?;
        let response = self
            .send(
                operation,
                Method::PUT,
                bucket_url(profile, bucket, Some("policy"))?,
                policy.into_bytes(),
                Some("application/json"),
                profile,
            )
            .await?;

        if !response.status.is_success() {
            return Err(BackendError::Provisioning {
                operation,
                message: response.diagnostic(),
            });
        }

        Ok(())
    }

    async fn apply_cors(&self, bucket: &BucketName, profile: &BackendProfile) -> Result<()> {
        let operation = "put bucket cors";
        let cors = CorsConfiguration::default().to_xml()?;
        let response = self
            .send(
                operation,
                Method::PUT,
                bucket_url(profile, bucket, Some("cors"))?,
                cors.into_bytes(),
                Some("application/xml"),
                profile,
            )
            .await?;

        if !response.status.is_success() {
            return Err(BackendError::Provisioning {
                operation,
                message: response.diagnostic(),
            });
        }

        Ok(())
    }

    async fn set_quota(&self, request: &QuotaRequest, profile: &BackendProfile) -> Result<()> {
        let operation = "set bucket quota";
        let uid = profile
            .uid()
            .ok_or(BackendError::MissingUid { operation })?;
        let url = quota_url(profile, uid, &request.bucket_name, request.quota)?;

        let response = self
            .send(operation, Method::PUT, url, Vec::new(), None, profile)
            .await?;

        if !response.status.is_success() {
            return Err(BackendError::Provisioning {
                operation,
                message: response.diagnostic(),
            });
        }

        info!(bucket = %request.bucket_name, quota = %request.quota, "bucket quota set");

        Ok(())
    }

    async fn get_quota(&self, _bucket: &BucketName, _profile: &BackendProfile) -> Result<Quota> {
        Err(BackendError::Unsupported {
            operation: "get bucket quota",
            flavor: EndpointFlavor::Rgw,
        })
    }
}
