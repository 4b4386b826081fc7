//! Error Handling Module
//!
//! A single public error type covers the whole pipeline:
//! - `ConfigurationError` is fatal and raised at build time, never retried
//! - `TransportError` / `TimeoutError` cover connection and socket failures
//! - `ProtocolError` carries the HTTP status and a body snapshot for non-2xx
//! - `SerializationError` / `DeserializationError` wrap marshalling failures

use thiserror::Error;

/// Errors produced by the request generation and execution pipeline.
#[derive(Error, Debug, Clone)]
pub enum RestError {
    /// Invalid or incomplete configuration (unresolved placeholder, duplicate
    /// unnamed body param, unknown method identity). Never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Connection-level failure before a response was received.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Per-attempt timeout elapsed (connect, socket, or pool acquisition).
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Non-2xx HTTP response. Carries the status and a snapshot of the
    /// response body when one could be read.
    #[error("HTTP {status}: {message}")]
    ProtocolError {
        status: u16,
        message: String,
        body: Option<String>,
    },

    /// Parameter serialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Response deserialization failure for the given mime type.
    #[error("Deserialization error ({mime}): {message}")]
    DeserializationError { mime: String, message: String },

    /// The single-use response content source was read a second time.
    #[error("response content already consumed")]
    ResponseConsumed,

    /// Invariant violation inside the pipeline.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RestError {
    /// Protocol error with a body snapshot, using the canonical reason
    /// phrase when the body is unreadable.
    pub fn protocol(status: u16, body: Option<String>) -> Self {
        let message = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string();
        Self::ProtocolError {
            status,
            message,
            body,
        }
    }

    /// HTTP status attached to this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ProtocolError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a default retry policy may re-run the pipeline for this error.
    ///
    /// Configuration and marshalling failures are deterministic and excluded;
    /// transport failures, timeouts, and server-side statuses qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError(_) | Self::TimeoutError(_) => true,
            Self::ProtocolError { status, .. } => {
                *status == 401 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::TimeoutError(e.to_string())
        } else if e.is_connect() {
            Self::TransportError(format!("connection failed: {e}"))
        } else {
            Self::TransportError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_carries_status_and_reason() {
        let err = RestError::protocol(404, Some("missing".into()));
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("Not Found"));
    }

    #[test]
    fn retryability_classification() {
        assert!(RestError::TransportError("refused".into()).is_retryable());
        assert!(RestError::protocol(503, None).is_retryable());
        assert!(RestError::protocol(401, None).is_retryable());
        assert!(!RestError::protocol(404, None).is_retryable());
        assert!(!RestError::ConfigurationError("bad".into()).is_retryable());
        assert!(!RestError::ResponseConsumed.is_retryable());
    }
}
