//! Error types for the package manager client.
//!
//! Every operation either returns a fully-populated response or one of these
//! errors. Variants are grouped the way callers tend to react to them: contract
//! violations, transport failures, protocol failures, and package inspection.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the package manager client.
#[derive(Debug, Error)]
pub enum PackmgrError {
    // Caller contract violations, raised before any I/O
    #[error("Invalid argument {field}: {message}")]
    InvalidArgument { field: String, message: String },

    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Service timeout exceeded.")]
    ServiceTimeout,

    #[error("Operation was cancelled")]
    Cancelled,

    // Protocol errors
    #[error("401 Unauthorized")]
    Unauthorized,

    #[error("Command not supported by service")]
    CommandNotSupported,

    #[error("{status} {reason}")]
    UnexpectedStatus { status: u16, reason: String },

    #[error("Exception encountered while parsing response: {message}")]
    InvalidResponse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Package archive errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Not a package: {0}")]
    NotAPackage(PathBuf),

    #[error("Invalid package archive {path:?}: {message}")]
    InvalidPackage { path: PathBuf, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for package manager operations.
pub type Result<T> = std::result::Result<T, PackmgrError>;

impl From<std::io::Error> for PackmgrError {
    fn from(err: std::io::Error) -> Self {
        PackmgrError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PackmgrError {
    fn from(err: serde_json::Error) -> Self {
        PackmgrError::InvalidResponse {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(any(feature = "async-http", feature = "blocking-http"))]
impl From<reqwest::Error> for PackmgrError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PackmgrError::Timeout(Duration::ZERO)
        } else {
            PackmgrError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

#[cfg(feature = "ureq-http")]
impl From<ureq::Error> for PackmgrError {
    fn from(err: ureq::Error) -> Self {
        let timed_out = std::error::Error::source(&err)
            .and_then(|s| s.downcast_ref::<std::io::Error>())
            .is_some_and(|io| {
                matches!(
                    io.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                )
            });

        if timed_out {
            PackmgrError::Timeout(Duration::ZERO)
        } else {
            PackmgrError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl PackmgrError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PackmgrError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        PackmgrError::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error was caused by an exceeded deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PackmgrError::Timeout(_) | PackmgrError::ServiceTimeout)
    }

    /// HTTP status code carried by a protocol failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PackmgrError::Unauthorized => Some(401),
            PackmgrError::CommandNotSupported => Some(400),
            PackmgrError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PackmgrError::UnexpectedStatus {
            status: 500,
            reason: "Internal Error".into(),
        };
        assert_eq!(err.to_string(), "500 Internal Error");
        assert_eq!(
            PackmgrError::CommandNotSupported.to_string(),
            "Command not supported by service"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PackmgrError::Unauthorized.status_code(), Some(401));
        assert_eq!(PackmgrError::CommandNotSupported.status_code(), Some(400));
        assert_eq!(PackmgrError::ServiceTimeout.status_code(), None);
    }

    #[test]
    fn test_timeout_errors() {
        assert!(PackmgrError::ServiceTimeout.is_timeout());
        assert!(PackmgrError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(!PackmgrError::Unauthorized.is_timeout());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PackmgrError = err.into();
        assert!(matches!(err, PackmgrError::InvalidResponse { source: Some(_), .. }));
    }
}
