//! Error types for MedChat
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! None of these messages are shown to end users. The orchestrator maps every
//! failure to one of the fixed replies in [`crate::agent::replies`].

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured classification of model-backend failures.
///
/// Drives the transport retry decision and the orchestrator's image
/// downgrade path without string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeout, connection failure or 5xx, still failing after the second attempt
    Transient(String),
    /// Any 4xx other than 413. Terminal, never retried
    ClientRejection { status: u16, message: String },
    /// Body was not JSON, or carried neither text nor tool calls
    MalformedResponse(String),
    /// Request exceeded the payload ceiling (pre-flight check or HTTP 413)
    PayloadTooLarge(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transient(msg) => write!(f, "Transient network error: {}", msg),
            ProviderError::ClientRejection { status, message } => {
                write!(f, "Client rejection (HTTP {}): {}", status, message)
            }
            ProviderError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            ProviderError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if the transport should make its second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Returns `true` if the orchestrator should rebuild the user turn with a
    /// smaller image budget and try again.
    pub fn triggers_downgrade(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_) | ProviderError::PayloadTooLarge(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::ClientRejection { status, .. } => Some(*status),
            ProviderError::PayloadTooLarge(_) => Some(413),
            ProviderError::Transient(_) | ProviderError::MalformedResponse(_) => None,
        }
    }
}

impl From<ProviderError> for MedchatError {
    fn from(err: ProviderError) -> Self {
        MedchatError::Provider(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for MedChat operations.
#[derive(Error, Debug)]
pub enum MedchatError {
    /// Configuration errors (missing credentials, invalid limits, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model backend failures with classification for retry/downgrade decisions.
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Tool handler failures (bad arguments, collaborator errors)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Storage collaborator failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Image decode/encode failures
    #[error("Image error: {0}")]
    Image(String),

    /// Resource not found (conversations, summaries, users)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MedchatError {
    /// Borrow the provider classification, if this is a backend failure.
    pub fn as_provider(&self) -> Option<&ProviderError> {
        match self {
            MedchatError::Provider(pe) => Some(pe),
            _ => None,
        }
    }
}

impl From<image::ImageError> for MedchatError {
    fn from(err: image::ImageError) -> Self {
        MedchatError::Image(err.to_string())
    }
}

/// A specialized `Result` type for MedChat operations.
pub type Result<T> = std::result::Result<T, MedchatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MedchatError::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MedchatError = io_err.into();
        assert!(matches!(err, MedchatError::Io(_)));
    }

    // ====================================================================
    // ProviderError tests
    // ====================================================================

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ProviderError::Transient("timeout".into()).is_retryable());
        assert!(!ProviderError::ClientRejection {
            status: 404,
            message: "nope".into()
        }
        .is_retryable());
        assert!(!ProviderError::MalformedResponse("{".into()).is_retryable());
        assert!(!ProviderError::PayloadTooLarge("3MB".into()).is_retryable());
    }

    #[test]
    fn test_downgrade_triggers() {
        assert!(ProviderError::Transient("502".into()).triggers_downgrade());
        assert!(ProviderError::PayloadTooLarge("413".into()).triggers_downgrade());
        assert!(!ProviderError::ClientRejection {
            status: 401,
            message: "bad key".into()
        }
        .triggers_downgrade());
        assert!(!ProviderError::MalformedResponse("".into()).triggers_downgrade());
    }

    #[test]
    fn test_status_code() {
        let rejection = ProviderError::ClientRejection {
            status: 422,
            message: "x".into(),
        };
        assert_eq!(rejection.status_code(), Some(422));
        assert_eq!(ProviderError::PayloadTooLarge("x".into()).status_code(), Some(413));
        assert_eq!(ProviderError::Transient("x".into()).status_code(), None);
    }

    #[test]
    fn test_provider_error_into_medchat_error() {
        let err: MedchatError = ProviderError::Transient("reset".into()).into();
        assert!(matches!(err, MedchatError::Provider(_)));
        assert_eq!(
            err.to_string(),
            "Provider error: Transient network error: reset"
        );
        assert!(err.as_provider().is_some());
    }
}
