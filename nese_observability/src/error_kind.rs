use std::fmt;

/// How the caller of a failed operation should react to it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The profile or the command line is wrong, an operator has to fix it.
    Configuration,
    /// Malformed allocation attribute or argument.
    Validation,
    /// The allocation, bucket or user does not exist.
    NotFound,
    /// A step ran without its dependencies.
    Conflict,
    /// Transient failure talking to the store or the storage endpoint.
    Temporary,
    /// Rejected by the storage endpoint, or a bug.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Temporary => "temporary",
            Self::Internal => "internal",
        }
    }

    /// Whether re-triggering the same operation may succeed without a fix.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary | Self::Conflict)
    }

    /// Process exit code, following `sysexits.h`.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Configuration => 78,
            Self::Validation => 65,
            Self::NotFound => 66,
            Self::Conflict | Self::Temporary => 75,
            Self::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ErrorKind::Configuration.exit_code(), 78);
        assert_eq!(ErrorKind::Conflict.exit_code(), 75);
        assert_eq!(ErrorKind::Internal.exit_code(), 70);
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Temporary.is_retryable());
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
