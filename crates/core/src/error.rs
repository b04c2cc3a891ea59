//! Error types for the warmprompt domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, and the top-level
//! [`Error`] exposes an [`ErrorKind`] so callers can decide whether
//! to retry upstream without matching on every variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all warmprompt operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request validation ---
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Composition errors ---
    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    // --- Invocation errors ---
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The caller-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Composition(_) => ErrorKind::CompositionInvariantViolation,
            Self::Invocation(e) => e.kind(),
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Distinguishing kind of a caller-visible failure.
///
/// Degradable context failures never appear here: they are absorbed by the
/// aggregator and the invocation proceeds with reduced context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    CompositionInvariantViolation,
    InvocationTransportFailure,
    InvocationTimeout,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::CompositionInvariantViolation => "composition_invariant_violation",
            Self::InvocationTransportFailure => "invocation_transport_failure",
            Self::InvocationTimeout => "invocation_timeout",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

/// A single context fetch failed. Always recovered by the aggregator.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// The cache-eligible prefix could not be guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error(
        "Static prefix for template '{version}' changed: expected sha256 {expected}, got {actual}"
    )]
    PrefixHashMismatch {
        version: String,
        expected: String,
        actual: String,
    },

    #[error("Block ordering violated at index {index}: {reason}")]
    OrderingViolated { index: usize, reason: String },

    #[error("Template '{0}' is empty")]
    EmptyTemplate(String),
}

/// Failures of the downstream model/tool invocation.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("Transport failure after {attempts} attempt(s): {last_error}")]
    Transport { attempts: u32, last_error: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned status {status_code}: {message}")]
    Status { status_code: u16, message: String },

    #[error("Invalid upstream response: {0}")]
    Protocol(String),

    #[error("Upstream model error: {0}")]
    Upstream(String),

    #[error("Invocation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The remote service reported that its own invocation timed out.
    #[error("Upstream invocation timed out: {0}")]
    UpstreamTimeout(String),

    #[error(
        "Stream timed out after {elapsed_ms}ms ({chunks_received} chunk(s) received, output incomplete)"
    )]
    StreamTimeout {
        chunks_received: usize,
        elapsed_ms: u64,
    },

    #[error("Stream interrupted after {chunks_received} chunk(s): {reason}")]
    StreamInterrupted {
        chunks_received: usize,
        reason: String,
    },
}

impl InvocationError {
    /// Caller-facing kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::UpstreamTimeout(_) | Self::StreamTimeout { .. } => {
                ErrorKind::InvocationTimeout
            }
            _ => ErrorKind::InvocationTransportFailure,
        }
    }

    /// Whether a single attempt failing this way may succeed on retry.
    ///
    /// Network errors, 5xx and 429 are transient. Other 4xx statuses and
    /// malformed responses will fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Status { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// Whether this error terminated a stream after some output was produced.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::StreamTimeout { chunks_received, .. }
                | Self::StreamInterrupted { chunks_received, .. } if *chunks_received > 0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_error_displays_correctly() {
        let err = Error::Invocation(InvocationError::Transport {
            attempts: 3,
            last_error: "connection refused".into(),
        });
        assert!(err.to_string().contains("3 attempt"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.kind(), ErrorKind::InvocationTransportFailure);
    }

    #[test]
    fn composition_error_kind() {
        let err = Error::from(CompositionError::PrefixHashMismatch {
            version: "v1".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(err.kind(), ErrorKind::CompositionInvariantViolation);
        assert!(err.to_string().contains("'v1'"));
    }

    #[test]
    fn timeouts_are_timeout_kind() {
        assert_eq!(
            InvocationError::Timeout { elapsed_ms: 10 }.kind(),
            ErrorKind::InvocationTimeout
        );
        assert_eq!(
            InvocationError::StreamTimeout {
                chunks_received: 2,
                elapsed_ms: 10
            }
            .kind(),
            ErrorKind::InvocationTimeout
        );
        let upstream = InvocationError::UpstreamTimeout("model exceeded 30s".into());
        assert_eq!(upstream.kind(), ErrorKind::InvocationTimeout);
        assert!(!upstream.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        assert!(InvocationError::Network("reset".into()).is_retryable());
        assert!(
            InvocationError::Status {
                status_code: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            InvocationError::Status {
                status_code: 429,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !InvocationError::Status {
                status_code: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!InvocationError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn partial_only_with_output() {
        let none = InvocationError::StreamInterrupted {
            chunks_received: 0,
            reason: "closed".into(),
        };
        let some = InvocationError::StreamTimeout {
            chunks_received: 3,
            elapsed_ms: 50,
        };
        assert!(!none.is_partial());
        assert!(some.is_partial());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvocationTimeout).unwrap();
        assert_eq!(json, "\"invocation_timeout\"");
        assert_eq!(ErrorKind::InvocationTimeout.to_string(), "invocation_timeout");
    }
}
