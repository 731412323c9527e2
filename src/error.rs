//! Error types for dialing through an SSH hop.
//!
//! Errors are structured so callers can tell their own mistakes (bad
//! connection strings) apart from environment problems and remote failures.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a connection string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecErrorReason {
    /// Not parseable as `[user[:pass]@]host[:port]`.
    Malformed,
    /// The user name starts with `-` and could be read as a client flag.
    UnsafeUser,
    /// The password starts with `-` and could be read as a client flag.
    UnsafePass,
    /// The host starts with `-` and no `user@` prefix protects it.
    UnsafeHost,
    /// The port is missing where required, not numeric or out of range.
    InvalidPort,
}

impl SpecErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnsafeUser => "unsafe_user",
            Self::UnsafePass => "unsafe_pass",
            Self::UnsafeHost => "unsafe_host",
            Self::InvalidPort => "invalid_port",
        }
    }
}

impl fmt::Display for SpecErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum HopError {
    #[error("Invalid connection spec ({reason}): {input}")]
    InvalidSpec {
        reason: SpecErrorReason,
        input: String,
    },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The client exited while the connection was being established.
    ///
    /// `diagnostic` is the client's stderr exactly as written, line endings
    /// included. Invalid UTF-8 is replaced with U+FFFD.
    #[error("SSH process exited while establishing connection{}: {diagnostic}", .status.map(|c| format!(" (exit code {})", c)).unwrap_or_default())]
    ConnectFailed {
        diagnostic: String,
        status: Option<i32>,
    },

    #[error("Timed out after {0:?} waiting for SSH connection")]
    Timeout(Duration),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HopError {
    pub(crate) fn invalid_spec(reason: SpecErrorReason, input: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason,
            input: input.into(),
        }
    }

    /// Returns the rejection reason for `InvalidSpec` errors.
    pub fn spec_reason(&self) -> Option<SpecErrorReason> {
        match self {
            Self::InvalidSpec { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether a caller could reasonably try the same request again.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_spec_display() {
        let err = HopError::invalid_spec(SpecErrorReason::UnsafeHost, "-host");
        assert_eq!(
            err.to_string(),
            "Invalid connection spec (unsafe_host): -host"
        );
        assert_eq!(err.spec_reason(), Some(SpecErrorReason::UnsafeHost));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connect_failed_display() {
        let err = HopError::ConnectFailed {
            diagnostic: "Permission denied (publickey).".to_string(),
            status: Some(255),
        };
        assert_eq!(
            err.to_string(),
            "SSH process exited while establishing connection (exit code 255): Permission denied (publickey)."
        );
        assert!(err.is_retryable());

        let err = HopError::ConnectFailed {
            diagnostic: "killed".to_string(),
            status: None,
        };
        assert_eq!(
            err.to_string(),
            "SSH process exited while establishing connection: killed"
        );
    }

    #[test]
    fn test_lifecycle_errors() {
        assert_eq!(HopError::Cancelled.to_string(), "Connection attempt cancelled");
        assert!(!HopError::Cancelled.is_retryable());
        assert!(HopError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(HopError::Cancelled.spec_reason().is_none());
    }
}
