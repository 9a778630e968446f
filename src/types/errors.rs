//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Failures raised by actor operations are
//! not represented here; see [`crate::actors::HandlerError`].

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the agent runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input or a rejected registration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown actor, operation or queue.
    #[error("not found: {0}")]
    NotFound(String),

    /// Component used before it was configured, or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal errors (closed channels, stopped workers).
    #[error("internal error: {0}")]
    Internal(String),

    /// Work abandoned because the runtime is shutting down.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Pending request expired before a correlated result arrived.
    #[error("timeout: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// MessagePack encode/decode errors.
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is the timeout class produced by pending-request expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::configuration("mapper proxy is not attached");
        assert_eq!(
            err.to_string(),
            "configuration error: mapper proxy is not attached"
        );
        assert!(Error::timeout("t").is_timeout());
        assert!(!Error::internal("i").is_timeout());
    }
}
