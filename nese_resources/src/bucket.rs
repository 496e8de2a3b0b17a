use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Suffix appended to a bucket name to form its management user name.
const MANAGEMENT_USER_SUFFIX: &str = "_datamanager";

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum BucketNameError {
    #[snafu(display("invalid bucket name '{name}': must be between 3 and 63 characters long"))]
    InvalidLength { name: String },
    #[snafu(display(
        "invalid bucket name '{name}': must start and end with a lowercase letter or number"
    ))]
    InvalidBoundary { name: String },
    #[snafu(display("invalid bucket name '{name}': character '{ch}' is not allowed"))]
    InvalidCharacter { name: String, ch: char },
}

/// A validated bucket name.
///
/// Valid bucket names:
/// - Are between 3 and 63 characters long
/// - Start and end with a lowercase letter or a number
/// - Contain only lowercase letters, numbers, dots (.), hyphens (-) and underscores (_)
///
/// Underscores are not allowed by AWS but are accepted by both gateways we
/// provision against, and existing allocations use them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();

        if !(3..=63).contains(&name.len()) {
            return Err(BucketNameError::InvalidLength { name });
        }

        let is_boundary = |ch: char| ch.is_ascii_lowercase() || ch.is_ascii_digit();
        let first = name.chars().next();
        let last = name.chars().last();
        if !first.is_some_and(is_boundary) || !last.is_some_and(is_boundary) {
            return Err(BucketNameError::InvalidBoundary { name });
        }

        if let Some(ch) = name.chars().find(|ch| {
            !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && !matches!(ch, '.' | '-' | '_')
        }) {
            return Err(BucketNameError::InvalidCharacter { name, ch });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name of the user that manages this bucket.
    pub fn management_user(&self) -> String {
        management_user_name(&self.0)
    }
}

/// Derive the management user name for a bucket.
pub fn management_user_name(bucket: &str) -> String {
    format!("{bucket}{MANAGEMENT_USER_SUFFIX}")
}

impl TryFrom<String> for BucketName {
    type Error = BucketNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketName> for String {
    fn from(value: BucketName) -> Self {
        value.0
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_bucket_names() {
        for name in ["abc", "lab-data", "lab.data.2024", "smith_lab", "0123"] {
            assert!(BucketName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_bucket_names() {
        assert!(matches!(
            BucketName::new("ab"),
            Err(BucketNameError::InvalidLength { .. })
        ));
        assert!(matches!(
            BucketName::new("a".repeat(64)),
            Err(BucketNameError::InvalidLength { .. })
        ));
        assert!(matches!(
            BucketName::new("-lab"),
            Err(BucketNameError::InvalidBoundary { .. })
        ));
        assert!(matches!(
            BucketName::new("lab."),
            Err(BucketNameError::InvalidBoundary { .. })
        ));
        assert_eq!(
            BucketName::new("Lab-data"),
            Err(BucketNameError::InvalidBoundary {
                name: "Lab-data".to_string()
            })
        );
        assert_eq!(
            BucketName::new("lab data"),
            Err(BucketNameError::InvalidCharacter {
                name: "lab data".to_string(),
                ch: ' '
            })
        );
    }

    #[test]
    fn test_management_user() {
        let bucket = BucketName::new("smith-lab").unwrap();
        assert_eq!(bucket.management_user(), "smith-lab_datamanager");
    }
}
