//! Error types for Cadence
//!
//! One taxonomy for the whole sync core. Callers decide retry behavior
//! from [`CadenceError::is_retryable`]; nothing in this module retries.

/// Main error type for Cadence operations
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// Bad or incomplete caller input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced user, credential, or state is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing required secret or configuration. Operator must remediate.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failure talking to an external service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx or malformed response from an external service.
    #[error("Protocol error (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    /// The external service answered well-formed but refused the request.
    #[error("Remote rejection: {0}")]
    Remote(String),

    /// Integrity or key-availability failure in the credential vault.
    /// Always fatal; requires operator action.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Persisted gamification state is not a well-formed snapshot.
    #[error("State format error: {0}")]
    StateFormat(String),

    /// Database-level failure (connection, index, write).
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CadenceError {
    /// Whether the orchestrator may retry the failed operation.
    ///
    /// Transport failures are always transient. Protocol failures are
    /// retryable only for rate limiting (429) and server-side errors (5xx).
    /// Everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Protocol { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for CadenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<mongodb::error::Error> for CadenceError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(CadenceError::Transport("connection refused".into()).is_retryable());
    }

    #[test]
    fn protocol_retryability_follows_status() {
        let rate_limited = CadenceError::Protocol {
            status: 429,
            message: "slow down".into(),
        };
        let server_error = CadenceError::Protocol {
            status: 503,
            message: "unavailable".into(),
        };
        let bad_request = CadenceError::Protocol {
            status: 400,
            message: "malformed".into(),
        };
        assert!(rate_limited.is_retryable());
        assert!(server_error.is_retryable());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn fatal_kinds_are_not_retryable() {
        assert!(!CadenceError::Validation("bad".into()).is_retryable());
        assert!(!CadenceError::Decryption("tampered".into()).is_retryable());
        assert!(!CadenceError::Remote("task not found".into()).is_retryable());
        assert!(!CadenceError::Config("missing secret".into()).is_retryable());
    }
}
