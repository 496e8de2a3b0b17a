use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Factor used to express a terabyte quota in kilobytes on gateways that
/// enforce a server-side quota.
pub const KILOBYTES_PER_TERABYTE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum QuotaError {
    #[snafu(display("quota of {terabytes}TB does not fit in kilobytes"))]
    Overflow { terabytes: u64 },
}

/// A bucket quota, in whole terabytes.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quota(u64);

impl Quota {
    pub const fn from_terabytes(terabytes: u64) -> Self {
        Self(terabytes)
    }

    pub fn terabytes(&self) -> u64 {
        self.0
    }

    /// The quota in kilobytes, as sent to server-side quota primitives.
    pub fn to_kilobytes(&self) -> Result<u64, QuotaError> {
        self.0
            .checked_mul(KILOBYTES_PER_TERABYTE)
            .ok_or(QuotaError::Overflow { terabytes: self.0 })
    }
}

impl From<u64> for Quota {
    fn from(terabytes: u64) -> Self {
        Self(terabytes)
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}TB", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_to_kilobytes() {
        assert_eq!(
            Quota::from_terabytes(5).to_kilobytes(),
            Ok(5 * 1024 * 1024 * 1024)
        );
        assert_eq!(Quota::from_terabytes(0).to_kilobytes(), Ok(0));
    }

    #[test]
    fn test_quota_overflow() {
        assert_eq!(
            Quota::from_terabytes(u64::MAX).to_kilobytes(),
            Err(QuotaError::Overflow {
                terabytes: u64::MAX
            })
        );
    }
}
