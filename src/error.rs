//! Error types for the lento Presto/Trino statement-protocol client
//!
//! This module defines the closed error taxonomy used throughout the crate,
//! using `thiserror` for ergonomic error handling. Unlike an application
//! binary, a client library exposes a concrete enum rather than `anyhow` so
//! callers can match on error kind.

use thiserror::Error;

/// Machine-readable code attached to a transport-level error.
///
/// Mirrors the Node `err.code` strings the original implementation surfaced
/// (`ECONNREFUSED`, `ECONNRESET`, `ETIMEDOUT`, `Z_DATA_ERROR`), kept as a
/// typed enum rather than bare strings so callers can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// The connection was refused by the remote host.
    ConnectionRefused,
    /// The connection was reset by the remote host mid-request.
    ConnectionReset,
    /// The socket timed out waiting for data.
    TimedOut,
    /// Gzip/deflate decompression failed.
    DataError,
    /// Any other transport-level failure (DNS, TLS, etc.) not classified above.
    Other,
}

impl std::fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::ConnectionReset => "ECONNRESET",
            Self::TimedOut => "ETIMEDOUT",
            Self::DataError => "Z_DATA_ERROR",
            Self::Other => "EOTHER",
        };
        f.write_str(s)
    }
}

/// The closed error type for every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum PrestoClientError {
    /// The SQL statement text was empty.
    #[error("statement text must not be empty")]
    EmptyStatement,

    /// A session property key failed the `^[a-z]+[a-z_.]*[a-z]+$` pattern.
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    /// A session property value was not a string, number, or boolean, or was
    /// a non-finite number.
    #[error("invalid session value for key {key}: {reason}")]
    InvalidSessionValue {
        /// The offending session key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A duration option (`poll_interval`, `socket_timeout`) was not a
    /// positive value.
    #[error("invalid duration for {field}: must be positive, got {value:?}")]
    InvalidDuration {
        /// Name of the offending configuration field.
        field: &'static str,
        /// The rejected value, formatted for display.
        value: std::time::Duration,
    },

    /// A retryable transport-level failure (after retries are exhausted, or
    /// when the caller disabled retries).
    #[error("transport error ({code}): {message}")]
    Transport {
        /// Machine-readable classification.
        code: TransportErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// A non-retryable HTTP status (4xx, or 5xx other than 503).
    #[error("{message}")]
    HttpFailure {
        /// The HTTP status code.
        status: u16,
        /// Either the trimmed `text/plain` body or the standard reason phrase.
        message: String,
    },

    /// A protocol-level violation: bad redirect, bad `nextUri`, unexpected
    /// content type, or JSON parse failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A Presto-level error carried in a `200 application/json` body.
    #[error("{code}: {message}")]
    Presto {
        /// `error.errorName` from the response.
        code: String,
        /// `error.errorType` from the response.
        kind: String,
        /// Full formatted message (`"<code>: <message>"` is also `Display`).
        message: String,
        /// Optional `error.failureInfo`.
        info: Option<serde_json::Value>,
    },

    /// The statement was cancelled. Carries both the caller-supplied
    /// cancellation cause (if any) and any error encountered while issuing
    /// the `DELETE` cancellation request (if any).
    #[error("statement cancelled{}{}",
        cause.as_ref().map(|c| format!("; cause: {c}")).unwrap_or_default(),
        cancel_error.as_ref().map(|c| format!("; cancel request failed: {c}")).unwrap_or_default())]
    Cancelled {
        /// The caller-supplied reason for cancellation, if any.
        cause: Option<Box<PrestoClientError>>,
        /// An error encountered while issuing the cancellation `DELETE`.
        cancel_error: Option<Box<PrestoClientError>>,
    },
}

impl From<serde_json::Error> for PrestoClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("JSON parse failure: {e}"))
    }
}

impl From<url::ParseError> for PrestoClientError {
    fn from(e: url::ParseError) -> Self {
        Self::Protocol(format!("invalid URL: {e}"))
    }
}

impl From<reqwest::Error> for PrestoClientError {
    fn from(e: reqwest::Error) -> Self {
        let code = if e.is_timeout() {
            TransportErrorCode::TimedOut
        } else if e.is_connect() {
            TransportErrorCode::ConnectionRefused
        } else {
            TransportErrorCode::Other
        };
        Self::Transport {
            code,
            message: e.to_string(),
        }
    }
}

/// Result type alias for lento operations.
pub type Result<T> = std::result::Result<T, PrestoClientError>;
