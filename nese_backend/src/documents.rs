//! Request documents shared by the backend adapters.
//!
//! Bucket policies are JSON, CORS configurations are S3 XML and MinIO quota
//! signals are bucket tags. Everything here is pure so it can be checked
//! without a live endpoint.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{BackendError, Result};

pub const POLICY_VERSION: &str = "2012-10-17";

/// Actions granted to the bucket management user.
pub const READ_WRITE_ACTIONS: [&str; 4] = [
    "s3:DeleteObject",
    "s3:GetObject",
    "s3:ListBucket",
    "s3:PutObject",
];

/// Actions granted to everyone.
pub const PUBLIC_READ_ACTIONS: [&str; 2] = ["s3:GetObject", "s3:ListBucket"];

pub const CORS_ALLOWED_ORIGINS: [&str; 3] = [
    "https://*.mghpcc.org",
    "https://*.osn.mghpcc.org",
    "https://*.osn.xsede.org",
];
pub const CORS_ALLOWED_METHODS: [&str; 5] = ["HEAD", "GET", "PUT", "POST", "DELETE"];
pub const CORS_EXPOSE_HEADERS: [&str; 6] = [
    "ETag",
    "date",
    "x-amz-meta-custom-header",
    "x-amz-server-side-encryption",
    "x-amz-request-id",
    "x-amz-id-2",
];
pub const CORS_MAX_AGE_SECONDS: u32 = 3000;

/// Tag carrying the quota (in terabytes) on MinIO buckets.
pub const QUOTA_TAG: &str = "quota";
/// Tag carrying the time of the last quota update on MinIO buckets.
pub const TIMESTAMP_TAG: &str = "timestamp";

/// Length of derived MinIO user secrets.
pub const USER_SECRET_LENGTH: usize = 30;

const SECRET_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

type HmacSha256 = Hmac<Sha256>;

const TAG_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PolicyPrincipal>,
    pub action: Vec<String>,
    pub resource: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPrincipal {
    #[serde(rename = "AWS")]
    pub aws: Vec<String>,
}

impl PolicyDocument {
    /// Bucket policy granting read/write to `principal` and read to everyone.
    pub fn bucket_policy(bucket: &str, principal: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![
                PolicyStatement::allow(
                    "bucket read write policy",
                    Some(user_arn(principal)),
                    &READ_WRITE_ACTIONS,
                    bucket,
                ),
                PolicyStatement::allow(
                    "bucket read policy",
                    Some("*".to_string()),
                    &PUBLIC_READ_ACTIONS,
                    bucket,
                ),
            ],
        }
    }

    /// Identity policy attached to the management user on MinIO.
    pub fn user_policy(bucket: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![PolicyStatement::allow(
                "bucket read write policy",
                None,
                &READ_WRITE_ACTIONS,
                bucket,
            )],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| BackendError::Encode {
            document: "bucket policy",
            message: err.to_string(),
        })
    }
}

impl PolicyStatement {
    fn allow(sid: &str, principal: Option<String>, actions: &[&str], bucket: &str) -> Self {
        Self {
            sid: sid.to_string(),
            effect: "Allow".to_string(),
            principal: principal.map(|p| PolicyPrincipal { aws: vec![p] }),
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: bucket_resources(bucket),
        }
    }
}

pub fn user_arn(user: &str) -> String {
    format!("arn:aws:iam:::user/{user}")
}

pub fn bucket_resources(bucket: &str) -> Vec<String> {
    vec![
        format!("arn:aws:s3:::{bucket}"),
        format!("arn:aws:s3:::{bucket}/*"),
    ]
}

/// Name of the canned MinIO policy created for a bucket.
pub fn canned_policy_name(bucket: &str) -> String {
    format!("{bucket}_policy")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename = "CORSConfiguration")]
pub struct CorsConfiguration {
    #[serde(rename = "CORSRule")]
    pub rules: Vec<CorsRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorsRule {
    #[serde(rename = "AllowedHeader")]
    pub allowed_headers: Vec<String>,
    #[serde(rename = "AllowedMethod")]
    pub allowed_methods: Vec<String>,
    #[serde(rename = "AllowedOrigin")]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "ExposeHeader")]
    pub expose_headers: Vec<String>,
    #[serde(rename = "MaxAgeSeconds")]
    pub max_age_seconds: u32,
}

impl Default for CorsConfiguration {
    fn default() -> Self {
        Self {
            rules: vec![CorsRule {
                allowed_headers: vec!["*".to_string()],
                allowed_methods: owned(&CORS_ALLOWED_METHODS),
                allowed_origins: owned(&CORS_ALLOWED_ORIGINS),
                expose_headers: owned(&CORS_EXPOSE_HEADERS),
                max_age_seconds: CORS_MAX_AGE_SECONDS,
            }],
        }
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl CorsConfiguration {
    pub fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|err| BackendError::Encode {
            document: "cors configuration",
            message: err.to_string(),
        })
    }
}

/// Base64 encoded MD5 digest, as sent in `Content-MD5`.
pub fn content_md5(body: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(body);
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Hex encoded SHA-256 digest, as sent in `x-amz-content-sha256`.
pub fn payload_sha256(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Derive the secret of a MinIO user from the admin secret.
///
/// The same admin secret and user name always produce the same secret, so
/// repeated user creation hands out identical credentials.
pub fn derive_user_secret(admin_secret: &str, user: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(admin_secret.as_bytes()).map_err(|_| {
        BackendError::Encode {
            document: "user secret",
            message: "failed to initialize hmac".to_string(),
        }
    })?;
    mac.update(user.as_bytes());
    let digest = mac.finalize().into_bytes();

    Ok(digest
        .iter()
        .take(USER_SECRET_LENGTH)
        .map(|byte| SECRET_ALPHABET[(*byte & 0x3f) as usize] as char)
        .collect())
}

/// Encode bucket tags as the `k=v&k=v` string accepted by `mc tag set`.
pub fn encode_tags(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, TAG_ENCODE_SET),
                utf8_percent_encode(value, TAG_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Deserialize)]
struct TagListOutput {
    #[serde(default)]
    tagset: BTreeMap<String, String>,
}

/// Parse the output of `mc tag list --json`.
pub fn parse_tag_list(output: &str) -> Result<BTreeMap<String, String>> {
    let parsed: TagListOutput =
        serde_json::from_str(output.trim()).map_err(|err| BackendError::Decode {
            operation: "tag list",
            message: err.to_string(),
        })?;
    Ok(parsed.tagset)
}

/// Read the quota tag, in terabytes.
pub fn quota_from_tags(tags: &BTreeMap<String, String>) -> Result<u64> {
    let value = tags.get(QUOTA_TAG).ok_or_else(|| BackendError::Decode {
        operation: "tag list",
        message: "bucket has no quota tag".to_string(),
    })?;

    value.trim().parse().map_err(|_| BackendError::Decode {
        operation: "tag list",
        message: format!("quota tag is not a whole number: {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_policy_shape() {
        let policy = PolicyDocument::bucket_policy("lab-data", "lab-data_datamanager");
        let json: serde_json::Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        let statements = json["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 2);

        assert_eq!(
            statements[0]["Principal"]["AWS"][0],
            "arn:aws:iam:::user/lab-data_datamanager"
        );
        assert_eq!(
            statements[0]["Action"],
            serde_json::json!([
                "s3:DeleteObject",
                "s3:GetObject",
                "s3:ListBucket",
                "s3:PutObject"
            ])
        );
        assert_eq!(statements[1]["Principal"]["AWS"][0], "*");
        assert_eq!(
            statements[1]["Action"],
            serde_json::json!(["s3:GetObject", "s3:ListBucket"])
        );
        for statement in statements {
            assert_eq!(
                statement["Resource"],
                serde_json::json!(["arn:aws:s3:::lab-data", "arn:aws:s3:::lab-data/*"])
            );
        }
    }

    #[test]
    fn test_user_policy_has_no_principal() {
        let policy = PolicyDocument::user_policy("lab-data");
        let json = policy.to_json().unwrap();

        assert!(!json.contains("Principal"));
        assert_eq!(canned_policy_name("lab-data"), "lab-data_policy");
    }

    #[test]
    fn test_cors_document() {
        let xml = CorsConfiguration::default().to_xml().unwrap();

        assert!(xml.starts_with("<CORSConfiguration><CORSRule>"));
        assert!(xml.contains("<AllowedHeader>*</AllowedHeader>"));
        for method in CORS_ALLOWED_METHODS {
            assert!(xml.contains(&format!("<AllowedMethod>{method}</AllowedMethod>")));
        }
        for origin in CORS_ALLOWED_ORIGINS {
            assert!(xml.contains(&format!("<AllowedOrigin>{origin}</AllowedOrigin>")));
        }
        assert!(xml.contains("<ExposeHeader>x-amz-id-2</ExposeHeader>"));
        assert!(xml.contains("<MaxAgeSeconds>3000</MaxAgeSeconds>"));
    }

    #[test]
    fn test_content_md5() {
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(
            payload_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_derived_secret_is_stable() {
        let first = derive_user_secret("admin-secret", "lab-data_datamanager").unwrap();
        let second = derive_user_secret("admin-secret", "lab-data_datamanager").unwrap();
        let other = derive_user_secret("admin-secret", "other_datamanager").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), USER_SECRET_LENGTH);
        assert!(first.bytes().all(|b| SECRET_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_encode_tags() {
        let tags = BTreeMap::from([
            ("quota".to_string(), "10".to_string()),
            ("pi".to_string(), "Jane Doe".to_string()),
            ("projname".to_string(), "a&b".to_string()),
        ]);

        assert_eq!(encode_tags(&tags), "pi=Jane%20Doe&projname=a%26b&quota=10");
    }

    #[test]
    fn test_parse_tag_list() {
        let output = r#"{"status":"success","name":"NESE/lab-data","tagset":{"quota":"8","timestamp":"1700000000"}}"#;
        let tags = parse_tag_list(output).unwrap();

        assert_eq!(quota_from_tags(&tags).unwrap(), 8);
    }

    #[test]
    fn test_missing_or_invalid_quota_tag() {
        let tags = parse_tag_list(r#"{"status":"success"}"#).unwrap();
        assert!(quota_from_tags(&tags).is_err());

        let tags = BTreeMap::from([("quota".to_string(), "ten".to_string())]);
        assert!(quota_from_tags(&tags).is_err());
    }
}
