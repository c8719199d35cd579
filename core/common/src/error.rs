//! Common error types for Keyfort.

use thiserror::Error;

/// Top-level error type for Keyfort operations.
///
/// Every fallible operation in the engine returns one of these specific
/// kinds, never a generic failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed argument or invalid request.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Authentication or decryption failure, including wrong store key.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Capability or algorithm mismatch.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Underlying storage I/O failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Contention: a concurrent writer interfered with the operation.
    #[error("Busy: {0}")]
    Busy(String),

    /// Unexpected internal failure.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Numeric error code as surfaced to external callers.
    pub fn code(&self) -> i64 {
        match self {
            Error::Backend(_) => 1,
            Error::Busy(_) => 2,
            Error::Duplicate(_) => 3,
            Error::Encryption(_) => 4,
            Error::Input(_) => 5,
            Error::NotFound(_) => 6,
            Error::Unexpected(_) => 7,
            Error::Unsupported(_) => 8,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Input(format!("Serialization error: {}", err))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Backend("x".into()).code(), 1);
        assert_eq!(Error::Busy("x".into()).code(), 2);
        assert_eq!(Error::Duplicate("x".into()).code(), 3);
        assert_eq!(Error::Encryption("x".into()).code(), 4);
        assert_eq!(Error::Input("x".into()).code(), 5);
        assert_eq!(Error::NotFound("x".into()).code(), 6);
        assert_eq!(Error::Unexpected("x".into()).code(), 7);
        assert_eq!(Error::Unsupported("x".into()).code(), 8);
    }

    #[test]
    fn test_io_error_maps_to_backend() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Backend(_)));
    }
}
