/// Network error types for the interpretation service
///
/// These never reach the workflow directly: the client folds them into
/// `InterpretationResult::Failure` before returning.

use thiserror::Error;

/// Network-related errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Request could not be sent or the connection dropped
    #[error("Failed to reach interpretation service: {0}")]
    Transport(String),

    /// Request did not complete in time
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Service answered with a non-success status
    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body is not valid for the current phase
    #[error("Malformed service response: {0}")]
    Protocol(String),

    /// Failed to serialize or deserialize a message
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NetworkError {
    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            NetworkError::Protocol(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_keeps_detail() {
        let err = NetworkError::Status {
            status: 503,
            body: "upstream down".to_string(),
        };
        assert_eq!(err.to_string(), "Service returned HTTP 503: upstream down");
        assert_eq!(err.status(), Some(503));
        assert_eq!(NetworkError::Protocol("x".into()).status(), None);
    }
}
