//! S3Desk Error Types

use thiserror::Error;

use crate::auth::AuthFailure;

/// Result type alias for S3Desk operations
pub type Result<T> = std::result::Result<T, Error>;

/// S3Desk error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Authorization errors
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthFailure),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Invalid credential secret: {0}")]
    SecretParse(#[from] serde_json::Error),

    // Request errors
    #[error("Path violation: {0}")]
    PathViolation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage backend returned status {status} for {key}")]
    BackendStatus { key: String, status: u16 },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend(_) => true,
            Error::BackendStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error was caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_)
                | Error::PathViolation(_)
                | Error::InvalidRequest(_)
                | Error::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Backend("connection reset".into()).is_retryable());
        assert!(Error::BackendStatus { key: "a".into(), status: 503 }.is_retryable());
        assert!(!Error::BackendStatus { key: "a".into(), status: 403 }.is_retryable());
        assert!(!Error::NotFound("a".into()).is_retryable());
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Unauthorized(AuthFailure::UnknownUser).is_client_error());
        assert!(Error::PathViolation("..".into()).is_client_error());
        assert!(!Error::Backend("down".into()).is_client_error());
    }
}
