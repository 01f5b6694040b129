//! Result and error types for Mender.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for Mender operations
pub type HealResult<T> = Result<T, HealError>;

/// Errors that can occur while healing a locator
#[derive(Debug, Error)]
pub enum HealError {
    /// Failure is not locator-related; healing is not attempted
    #[error("Failure is not locator-related: {reason}")]
    Classification {
        /// Why the failure was rejected
        reason: String,
    },

    /// No element information was available to build a fingerprint
    #[error("No fingerprint available for {key}")]
    FingerprintUnavailable {
        /// Fingerprint key (`script_id::step_id`)
        key: String,
    },

    /// The session pool did not hand out a session in time
    #[error("Session acquisition timed out after {ms}ms")]
    SessionAcquisitionTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Every candidate was tried and none was acceptable
    #[error("No alternative validated after {tried} candidate(s)")]
    CandidateExhausted {
        /// Number of candidates tried
        tried: usize,
    },

    /// A locator query failed inside the browser
    #[error("Locator query failed for `{locator}`: {message}")]
    ValidationQuery {
        /// Locator expression
        locator: String,
        /// Error message
        message: String,
    },

    /// Writing the healed script failed (write or post-write parse)
    #[error("Script update failed for {}: {message}", path.display())]
    FileUpdate {
        /// Script path
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// Restoring the backup after a failed update failed
    #[error("ROLLBACK FAILED for {}: {message} (script may be inconsistent)", path.display())]
    Rollback {
        /// Script path
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Session was cancelled
    #[error("Healing session cancelled")]
    Cancelled,

    /// A session for the same script and locator is already running
    #[error("Healing already in progress for `{locator}` in {script_id}")]
    AlreadyActive {
        /// Script identifier
        script_id: String,
        /// Original locator
        locator: String,
    },

    /// Locator expression could not be parsed
    #[error("Invalid locator expression `{expression}`: {message}")]
    InvalidLocator {
        /// Raw expression
        expression: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HealError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Whether the operation may succeed if retried after a backoff
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SessionAcquisitionTimeout { .. }
                | Self::BrowserLaunch { .. }
                | Self::Navigation { .. }
        )
    }

    /// Whether the error requires operator attention
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(HealError::SessionAcquisitionTimeout { ms: 10 }.is_transient());
        assert!(HealError::Navigation {
            url: "http://x".into(),
            message: "reset".into()
        }
        .is_transient());
        assert!(!HealError::CandidateExhausted { tried: 3 }.is_transient());
        assert!(!HealError::Cancelled.is_transient());
    }

    #[test]
    fn test_rollback_is_fatal() {
        let err = HealError::Rollback {
            path: PathBuf::from("login.spec.ts"),
            message: "disk full".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ROLLBACK FAILED"));
        assert!(err.to_string().contains("login.spec.ts"));
    }

    #[test]
    fn test_io_conversion() {
        let err: HealError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, HealError::Io(_)));
    }
}
