//! Request error taxonomy

use std::fmt;

use thiserror::Error;

/// Failure of an optimized request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// Connection failure, timeout, or unreadable body
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status
        status: u16,
        /// Status reason or response text
        message: String,
    },

    /// 2xx response whose body is not JSON
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The combined request of a batch failed; every call in it sees this
    #[error("batch dispatch failed: {0}")]
    Batch(Box<RequestError>),

    /// The request was dropped before completing
    #[error("request cancelled")]
    Cancelled,
}

/// Coarse classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure
    Network,
    /// Non-2xx status
    Http,
    /// Malformed body
    Decode,
    /// Batch dispatch failure
    Batch,
    /// Dropped before completion
    Cancelled,
}

impl ErrorKind {
    /// Upper-case label, e.g. `NETWORK`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Http => "HTTP",
            ErrorKind::Decode => "DECODE",
            ErrorKind::Batch => "BATCH",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestError {
    /// Build an HTTP error with the canonical reason for `status`
    pub fn http(status: u16) -> Self {
        let message = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown Status")
            .to_string();
        RequestError::Http { status, message }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Network(_) => ErrorKind::Network,
            RequestError::Http { .. } => ErrorKind::Http,
            RequestError::Decode(_) => ErrorKind::Decode,
            RequestError::Batch(_) => ErrorKind::Batch,
            RequestError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status, looking through batch failures
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            RequestError::Batch(inner) => inner.status(),
            _ => None,
        }
    }

    /// Network errors and allow-listed statuses are worth another attempt
    pub fn is_retryable(&self, retryable_status_codes: &[u16]) -> bool {
        match self {
            RequestError::Network(_) => true,
            RequestError::Http { status, .. } => retryable_status_codes.contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RequestError::http(status.as_u16()),
            None => RequestError::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(RequestError::Network("reset".into()).kind().as_str(), "NETWORK");
        assert_eq!(RequestError::http(404).kind().to_string(), "HTTP");
    }

    #[test]
    fn test_http_message() {
        assert_eq!(RequestError::http(503).to_string(), "HTTP 503: Service Unavailable");
        assert_eq!(RequestError::http(503).status(), Some(503));
    }

    #[test]
    fn test_retryable() {
        let codes = [408, 429, 500, 502, 503, 504];

        assert!(RequestError::Network("timeout".into()).is_retryable(&codes));
        assert!(RequestError::http(429).is_retryable(&codes));
        assert!(!RequestError::http(404).is_retryable(&codes));
        assert!(!RequestError::Decode("eof".into()).is_retryable(&codes));
        assert!(!RequestError::Batch(Box::new(RequestError::http(500))).is_retryable(&codes));
    }

    #[test]
    fn test_batch_status_passthrough() {
        let err = RequestError::Batch(Box::new(RequestError::http(502)));
        assert_eq!(err.kind(), ErrorKind::Batch);
        assert_eq!(err.status(), Some(502));
    }
}
