//! Error types and handling for Hestia
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Hestia operations
pub type Result<T> = std::result::Result<T, HestiaError>;

/// Main error type for Hestia
#[derive(Debug, Error)]
pub enum HestiaError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Credential invalid or refresh exchange failed; unrecoverable
    /// without re-authorization
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// No signing key material configured (fatal precondition)
    #[error("Signing error: {message}")]
    Signing { message: String },

    /// A failed outbound call, carrying the provider's status and message.
    /// Constructed once at the dispatcher boundary.
    #[error("Remote error ({status_code}): {provider_message}")]
    Remote {
        status_code: u16,
        provider_message: String,
        raw_body: String,
    },

    /// Coordination loop started while already running
    #[error("Coordination loop is already active")]
    AlreadyActive,

    /// Coordination loop stopped while not running
    #[error("Coordination loop is not active")]
    NotActive,

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors (transport failed before a response)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HestiaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HestiaError::Config {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HestiaError::Auth {
            message: message.into(),
        }
    }

    /// Create a new signing error
    pub fn signing<S: Into<String>>(message: S) -> Self {
        HestiaError::Signing {
            message: message.into(),
        }
    }

    /// Create a new remote error from a provider response
    pub fn remote<M: Into<String>, B: Into<String>>(
        status_code: u16,
        provider_message: M,
        raw_body: B,
    ) -> Self {
        HestiaError::Remote {
            status_code,
            provider_message: provider_message.into(),
            raw_body: raw_body.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        HestiaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HestiaError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HestiaError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HestiaError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HestiaError::Generic {
            message: message.into(),
        }
    }

    /// HTTP status carried by a remote error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HestiaError::Remote { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HestiaError {
    fn from(err: std::io::Error) -> Self {
        HestiaError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HestiaError {
    fn from(err: serde_yaml::Error) -> Self {
        HestiaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HestiaError {
    fn from(err: serde_json::Error) -> Self {
        HestiaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HestiaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HestiaError::timeout(err.to_string())
        } else {
            HestiaError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for HestiaError {
    fn from(err: chrono::ParseError) -> Self {
        HestiaError::validation("datetime", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HestiaError::config("test config error");
        assert!(matches!(err, HestiaError::Config { .. }));

        let err = HestiaError::auth("token revoked");
        assert!(matches!(err, HestiaError::Auth { .. }));

        let err = HestiaError::validation("field", "test validation error");
        assert!(matches!(err, HestiaError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HestiaError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = HestiaError::remote(429, "rate limit exceeded", "{}");
        assert_eq!(format!("{}", err), "Remote error (429): rate limit exceeded");
        assert_eq!(err.status_code(), Some(429));

        let err = HestiaError::validation("test_field", "invalid value");
        assert_eq!(
            format!("{}", err),
            "Validation error: test_field - invalid value"
        );
    }

    #[test]
    fn test_loop_errors_display() {
        assert_eq!(
            format!("{}", HestiaError::AlreadyActive),
            "Coordination loop is already active"
        );
        assert_eq!(
            format!("{}", HestiaError::NotActive),
            "Coordination loop is not active"
        );
    }
}
