//! Transport: executes one prepared HTTP request and classifies its outcome
//!
//! Implements §4.1: 307 protocol-preserving redirects, 503 back-off retry,
//! connection-failure back-off retry, socket timeouts, gzip/deflate
//! decoding, and the final status/content-type/JSON validation steps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode};

use crate::config::Protocol;
use crate::error::{PrestoClientError, Result, TransportErrorCode};

/// Floor of the transport-level exponential back-off (§4.1).
pub const TRANSPORT_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
/// Ceiling of the transport-level exponential back-off (§4.1).
pub const TRANSPORT_BACKOFF_CEILING: Duration = Duration::from_secs(10);

/// Computes the exponential back-off delay for a given (zero-based) retry
/// attempt, clamped to `[floor, ceiling]`.
///
/// Pure function, independently testable without sleeping.
pub fn backoff_delay(attempt: u32, floor: Duration, ceiling: Duration) -> Duration {
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let scaled = floor.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
    scaled.min(ceiling)
}

/// A pluggable sleeper, so tests never wait out real back-off windows.
///
/// Production code uses [`TokioSleeper`]; tests inject a fake that resolves
/// immediately while still recording the requested durations.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// A [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared retry budget, consumed by both transport-level retries and
/// query-level restarts (§4.5: a single cap measured as emitted "retry"
/// events).
#[derive(Debug)]
pub struct RetryBudget {
    max: u32,
    used: AtomicU32,
}

impl RetryBudget {
    /// Creates a budget allowing up to `max` total retries.
    pub fn new(max: u32) -> Self {
        Self {
            max,
            used: AtomicU32::new(0),
        }
    }

    /// Attempts to consume one retry. Returns `false` if the budget is
    /// exhausted.
    pub fn try_consume(&self) -> bool {
        loop {
            let current = self.used.load(Ordering::Acquire);
            if current >= self.max {
                return false;
            }
            if self
                .used
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Number of retries consumed so far.
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    /// Remaining retry budget.
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used())
    }
}

/// One outbound request, fully resolved except for the physical dispatch.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// `http` or `https`.
    pub scheme: Protocol,
    /// Target host.
    pub host: String,
    /// Target port, or `None` to use the scheme default.
    pub port: Option<u16>,
    /// Path plus query string, e.g. `/v1/statement` or `/v1/query/abc`.
    pub path_and_query: String,
    /// Outgoing headers, in the order they should be applied (later entries
    /// with the same case-insensitive name override earlier ones).
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Option<Bytes>,
    /// The status code that signals success for this request.
    pub expect_status: u16,
    /// Whether the response body must be `application/json`.
    pub json_expected: bool,
}

impl PreparedRequest {
    fn url(&self) -> Result<url::Url> {
        let port = self.port.unwrap_or_else(|| self.scheme.default_port());
        let raw = format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            port,
            self.path_and_query
        );
        url::Url::parse(&raw).map_err(PrestoClientError::from)
    }
}

/// The decoded, validated result of executing one [`PreparedRequest`]
/// (after following redirects and exhausting transport-level retries).
#[derive(Debug, Clone)]
pub struct ExecutedResponse {
    /// The (expected) HTTP status code.
    pub status: u16,
    /// Response headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// The parsed JSON body, if `json_expected` was set and a body was present.
    pub json: Option<serde_json::Value>,
    /// The host that actually served this response -- the original request's
    /// host, or the 307 redirect target's host if one was followed.
    pub served_host: String,
    /// The port that actually served this response, mirroring `served_host`.
    pub served_port: Option<u16>,
}

enum DispatchOutcome {
    Success(ExecutedResponse),
    Redirect(url::Url),
    Retryable(PrestoClientError),
    Fatal(PrestoClientError),
}

/// Executes prepared requests against a coordinator and classifies outcomes.
pub struct Transport {
    client: reqwest::Client,
    socket_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("socket_timeout", &self.socket_timeout)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Builds a transport with the given per-request socket timeout.
    ///
    /// Redirects are disabled at the `reqwest` layer -- 307s are handled
    /// explicitly per §4.1 so the protocol-switch check can run.
    pub fn new(socket_timeout: Duration) -> Self {
        Self::with_sleeper(socket_timeout, Arc::new(TokioSleeper))
    }

    /// Builds a transport with an injected [`Sleeper`], for tests.
    pub fn with_sleeper(socket_timeout: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            socket_timeout,
            sleeper,
        }
    }

    /// Executes `request`, following 307 redirects and retrying
    /// transport-level retryable failures until `budget` is exhausted.
    ///
    /// `on_retry` is invoked with the back-off delay before each retry sleep
    /// (the "retry" observable event, §4.1).
    pub async fn execute(
        &self,
        request: PreparedRequest,
        budget: &RetryBudget,
        on_retry: &(dyn Fn(Duration) + Send + Sync),
    ) -> Result<ExecutedResponse> {
        let mut current = request;
        let mut attempt: u32 = 0;

        loop {
            match self.dispatch_once(&current).await {
                DispatchOutcome::Success(resp) => return Ok(resp),
                DispatchOutcome::Redirect(location) => {
                    current = apply_redirect(&current, &location)?;
                    continue;
                }
                DispatchOutcome::Retryable(err) => {
                    if !budget.try_consume() {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING);
                    on_retry(delay);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, %err, "retrying transport request");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                DispatchOutcome::Fatal(err) => return Err(err),
            }
        }
    }

    /// Executes `request` exactly once, with no retry loop (used for
    /// best-effort cancellation `DELETE`s, which must not block shutdown).
    pub async fn execute_once(&self, request: PreparedRequest) -> Result<ExecutedResponse> {
        match self.dispatch_once(&request).await {
            DispatchOutcome::Success(resp) => Ok(resp),
            DispatchOutcome::Redirect(location) => {
                let redirected = apply_redirect(&request, &location)?;
                match self.dispatch_once(&redirected).await {
                    DispatchOutcome::Success(resp) => Ok(resp),
                    DispatchOutcome::Retryable(err) | DispatchOutcome::Fatal(err) => Err(err),
                    DispatchOutcome::Redirect(_) => Err(PrestoClientError::Protocol(
                        "too many redirects".to_string(),
                    )),
                }
            }
            DispatchOutcome::Retryable(err) | DispatchOutcome::Fatal(err) => Err(err),
        }
    }

    async fn dispatch_once(&self, request: &PreparedRequest) -> DispatchOutcome {
        let url = match request.url() {
            Ok(u) => u,
            Err(e) => return DispatchOutcome::Fatal(e),
        };

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(self.socket_timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return classify_send_error(e),
        };

        let status = response.status();

        // Step 1: 307 redirect.
        if status == StatusCode::TEMPORARY_REDIRECT {
            return self.handle_redirect(request, response).await;
        }

        // Step 2: 503 -- discard body, retryable.
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let _ = response.bytes().await;
            return DispatchOutcome::Retryable(PrestoClientError::HttpFailure {
                status: 503,
                message: reason_phrase(status).to_string(),
            });
        }

        let headers = lower_case_headers(response.headers());
        let content_encoding = headers.get("content-encoding").cloned();
        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let content_type_lower = content_type.to_ascii_lowercase();

        let raw_body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return classify_send_error(e),
        };

        // Step 3/4: decode content-encoding, accumulate body.
        let body = match decode_body(raw_body, content_encoding.as_deref()) {
            Ok(b) => b,
            Err(e) => return DispatchOutcome::Fatal(e),
        };

        // Step 5: status code check.
        if status.as_u16() != request.expect_status {
            let status_u16 = status.as_u16();
            if (400..600).contains(&status_u16) {
                let trimmed_body = String::from_utf8_lossy(&body).trim().to_string();
                let message = if content_type_lower.starts_with("text/plain") && !trimmed_body.is_empty()
                {
                    trimmed_body
                } else {
                    reason_phrase(status).to_string()
                };
                return DispatchOutcome::Fatal(PrestoClientError::HttpFailure {
                    status: status_u16,
                    message,
                });
            }
            return DispatchOutcome::Fatal(PrestoClientError::HttpFailure {
                status: status_u16,
                message: format!("Unexpected HTTP status code: {status_u16}"),
            });
        }

        // Step 6: content type check.
        if request.json_expected && !content_type_lower.starts_with("application/json") {
            return DispatchOutcome::Fatal(PrestoClientError::Protocol(format!(
                "Unexpected HTTP content type: {content_type}"
            )));
        }

        // Step 7: JSON parse.
        let json = if request.json_expected && !body.is_empty() {
            match serde_json::from_slice::<serde_json::Value>(&body) {
                Ok(v) => Some(v),
                Err(e) => return DispatchOutcome::Fatal(PrestoClientError::from(e)),
            }
        } else {
            None
        };

        DispatchOutcome::Success(ExecutedResponse {
            status: status.as_u16(),
            headers,
            json,
            served_host: request.host.clone(),
            served_port: request.port,
        })
    }

    async fn handle_redirect(
        &self,
        request: &PreparedRequest,
        response: reqwest::Response,
    ) -> DispatchOutcome {
        let location = match response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(l) => l.to_string(),
            None => {
                return DispatchOutcome::Fatal(PrestoClientError::Protocol(
                    "HTTP 307 redirect missing Location header".to_string(),
                ))
            }
        };
        let parsed = match url::Url::parse(&location) {
            Ok(u) => u,
            Err(_) => {
                return DispatchOutcome::Fatal(PrestoClientError::Protocol(format!(
                    "HTTP 307 redirect has invalid Location: {location}"
                )))
            }
        };
        if parsed.scheme() != request.scheme.as_str() {
            return DispatchOutcome::Fatal(PrestoClientError::Protocol(
                "HTTP 307 redirect protocol switch is not allowed".to_string(),
            ));
        }
        DispatchOutcome::Redirect(parsed)
    }
}

fn apply_redirect(original: &PreparedRequest, location: &url::Url) -> Result<PreparedRequest> {
    let mut path_and_query = location.path().to_string();
    if let Some(q) = location.query() {
        path_and_query.push('?');
        path_and_query.push_str(q);
    }
    Ok(PreparedRequest {
        method: original.method.clone(),
        scheme: original.scheme,
        host: location
            .host_str()
            .ok_or_else(|| PrestoClientError::Protocol("redirect URL missing host".to_string()))?
            .to_string(),
        port: location.port(),
        path_and_query,
        headers: original.headers.clone(),
        body: original.body.clone(),
        expect_status: original.expect_status,
        json_expected: original.json_expected,
    })
}

fn lower_case_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect()
}

fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown Status")
}

fn decode_body(raw: Bytes, content_encoding: Option<&str>) -> Result<Bytes> {
    use std::io::Read;

    match content_encoding {
        Some(enc) if enc.eq_ignore_ascii_case("gzip") => {
            let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| {
                PrestoClientError::Transport {
                    code: TransportErrorCode::DataError,
                    message: format!("Unable to decode gzip content: {e}"),
                }
            })?;
            Ok(Bytes::from(out))
        }
        Some(enc) if enc.eq_ignore_ascii_case("deflate") => {
            let mut decoder = flate2::read::DeflateDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| {
                PrestoClientError::Transport {
                    code: TransportErrorCode::DataError,
                    message: format!("Unable to decode deflate content: {e}"),
                }
            })?;
            Ok(Bytes::from(out))
        }
        _ => Ok(raw),
    }
}

/// Classifies a `reqwest::Error` escaping `send()`/`bytes()` into a
/// transport-level outcome.
///
/// The retryable set per §4.1 is exactly: socket timeout, connection
/// refused, connection reset. Everything else (DNS failure, TLS handshake
/// failure, request builder errors) is fatal.
fn classify_send_error(e: reqwest::Error) -> DispatchOutcome {
    if e.is_timeout() {
        return DispatchOutcome::Retryable(PrestoClientError::Transport {
            code: TransportErrorCode::TimedOut,
            message: e.to_string(),
        });
    }
    if e.is_connect() {
        // reqwest does not distinguish ECONNREFUSED from ECONNRESET at the
        // connect stage; both surface identically through `is_connect()`
        // when the OS rejects or drops the TCP handshake.
        return DispatchOutcome::Retryable(PrestoClientError::Transport {
            code: TransportErrorCode::ConnectionRefused,
            message: e.to_string(),
        });
    }
    if e.is_request() && e.source().is_some() {
        // A mid-stream send/body failure after a connection was already
        // established typically means the peer reset the connection.
        return DispatchOutcome::Retryable(PrestoClientError::Transport {
            code: TransportErrorCode::ConnectionReset,
            message: e.to_string(),
        });
    }
    DispatchOutcome::Fatal(PrestoClientError::Transport {
        code: TransportErrorCode::Other,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_floor_on_first_attempt() {
        assert_eq!(
            backoff_delay(0, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(
            backoff_delay(1, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING),
            Duration::from_secs(2)
        );
        assert_eq!(
            backoff_delay(2, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING),
            Duration::from_secs(4)
        );
        assert_eq!(
            backoff_delay(3, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn backoff_clamps_to_ceiling() {
        assert_eq!(
            backoff_delay(10, TRANSPORT_BACKOFF_FLOOR, TRANSPORT_BACKOFF_CEILING),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn retry_budget_allows_up_to_max() {
        let budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn retry_budget_zero_allows_nothing() {
        let budget = RetryBudget::new(0);
        assert!(!budget.try_consume());
    }

    #[test]
    fn retry_budget_remaining() {
        let budget = RetryBudget::new(3);
        assert_eq!(budget.remaining(), 3);
        budget.try_consume();
        assert_eq!(budget.remaining(), 2);
    }

    #[test]
    fn decode_body_identity_without_encoding() {
        let raw = Bytes::from_static(b"hello");
        let decoded = decode_body(raw.clone(), None).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn decode_body_gzip_round_trip() {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello gzip").unwrap();
        let compressed = encoder.finish().unwrap();
        let decoded = decode_body(Bytes::from(compressed), Some("gzip")).unwrap();
        assert_eq!(&decoded[..], b"hello gzip");
    }

    #[test]
    fn decode_body_gzip_invalid_data_is_data_error() {
        let garbage = Bytes::from_static(b"not gzip data at all");
        let err = decode_body(garbage, Some("gzip")).unwrap_err();
        match err {
            PrestoClientError::Transport { code, .. } => {
                assert_eq!(code, TransportErrorCode::DataError);
            }
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[test]
    fn apply_redirect_preserves_method_and_body() {
        let original = PreparedRequest {
            method: Method::POST,
            scheme: Protocol::Http,
            host: "localhost".to_string(),
            port: Some(8080),
            path_and_query: "/v1/statement".to_string(),
            headers: vec![("x-presto-user".to_string(), "alice".to_string())],
            body: Some(Bytes::from_static(b"SELECT 1")),
            expect_status: 200,
            json_expected: true,
        };
        let location = url::Url::parse("http://other-host:8081/v1/statement?foo").unwrap();
        let redirected = apply_redirect(&original, &location).unwrap();
        assert_eq!(redirected.method, Method::POST);
        assert_eq!(redirected.host, "other-host");
        assert_eq!(redirected.port, Some(8081));
        assert_eq!(redirected.path_and_query, "/v1/statement?foo");
        assert_eq!(redirected.body, original.body);
        assert_eq!(redirected.headers, original.headers);
    }
}
