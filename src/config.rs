//! Client configuration for the lento Presto/Trino client
//!
//! Configuration is constructed programmatically via [`ClientConfigBuilder`];
//! per the specification, file or CLI-driven configuration loading is out of
//! scope for this crate.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{PrestoClientError, Result};

/// Wire protocol scheme used to reach the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// TLS-wrapped HTTP.
    Https,
}

impl Protocol {
    /// Returns `"http"` or `"https"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// The default port for this scheme (80/443) -- used only when a
    /// `nextUri` omits an explicit port.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Http
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Immutable client configuration.
///
/// Constructed via [`ClientConfigBuilder`] and validated with [`ClientConfig::validate`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator hostname.
    pub hostname: String,
    /// Coordinator port.
    pub port: u16,
    /// Wire scheme.
    pub protocol: Protocol,

    /// `x-presto-user` identity header.
    pub user: Option<String>,
    /// `x-presto-catalog` identity header.
    pub catalog: Option<String>,
    /// `x-presto-schema` identity header.
    pub schema: Option<String>,
    /// `x-presto-time-zone` identity header.
    pub timezone: Option<String>,
    /// `x-presto-client-tags`, comma-joined (§11.1 supplement).
    pub client_tags: Vec<String>,
    /// `x-presto-client-info` (§11.1 supplement).
    pub client_info: Option<String>,

    /// Enables `x-presto-client-capabilities: PARAMETRIC_DATETIME`.
    pub parametric_datetime: bool,

    /// Wait between polls of an unchanged `nextUri`.
    pub poll_interval: Duration,
    /// Per-HTTP-request idle/socket timeout.
    pub socket_timeout: Duration,
    /// Cap on combined transport + query-level retries. `0` disables retries.
    pub max_retries: u32,

    /// Extra headers merged into every outgoing request, last-wins,
    /// case-insensitive against the protocol-mandated headers.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8080,
            protocol: Protocol::Http,
            user: None,
            catalog: None,
            schema: None,
            timezone: None,
            client_tags: Vec::new(),
            client_info: None,
            parametric_datetime: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Validates the configuration per §3/§7 of the specification.
    ///
    /// # Errors
    ///
    /// Returns [`PrestoClientError::InvalidDuration`] if `poll_interval` or
    /// `socket_timeout` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(PrestoClientError::InvalidDuration {
                field: "poll_interval",
                value: self.poll_interval,
            });
        }
        if self.socket_timeout.is_zero() {
            return Err(PrestoClientError::InvalidDuration {
                field: "socket_timeout",
                value: self.socket_timeout,
            });
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
///
/// # Examples
///
/// ```
/// use lento::config::{ClientConfigBuilder, Protocol};
///
/// let config = ClientConfigBuilder::new()
///     .hostname("coordinator.internal")
///     .port(8443)
///     .protocol(Protocol::Https)
///     .user("alice")
///     .build()
///     .unwrap();
/// assert_eq!(config.hostname, "coordinator.internal");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    /// Starts a new builder seeded with the defaults from §3.
    pub fn new() -> Self {
        Self {
            inner: ClientConfig::default(),
        }
    }

    /// Sets the coordinator hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.inner.hostname = hostname.into();
        self
    }

    /// Sets the coordinator port.
    pub fn port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    /// Sets the wire scheme.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.inner.protocol = protocol;
        self
    }

    /// Sets the `x-presto-user` header.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.inner.user = Some(user.into());
        self
    }

    /// Sets the `x-presto-catalog` header.
    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.inner.catalog = Some(catalog.into());
        self
    }

    /// Sets the `x-presto-schema` header.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.inner.schema = Some(schema.into());
        self
    }

    /// Sets the `x-presto-time-zone` header.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.inner.timezone = Some(timezone.into());
        self
    }

    /// Sets the `x-presto-client-tags` values.
    pub fn client_tags(mut self, tags: Vec<String>) -> Self {
        self.inner.client_tags = tags;
        self
    }

    /// Sets the `x-presto-client-info` header.
    pub fn client_info(mut self, info: impl Into<String>) -> Self {
        self.inner.client_info = Some(info.into());
        self
    }

    /// Enables the `PARAMETRIC_DATETIME` client capability.
    pub fn parametric_datetime(mut self, enabled: bool) -> Self {
        self.inner.parametric_datetime = enabled;
        self
    }

    /// Sets the poll interval for unchanged-`nextUri` polling.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.inner.poll_interval = interval;
        self
    }

    /// Sets the per-request socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.inner.socket_timeout = timeout;
        self
    }

    /// Sets the combined transport + query retry cap.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.inner.max_retries = max_retries;
        self
    }

    /// Adds (or overrides, last-wins) an extra outgoing header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a map of extra outgoing headers.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.inner.headers.extend(headers);
        self
    }

    /// Validates and returns the finished [`ClientConfig`].
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::validate`].
    pub fn build(self) -> Result<ClientConfig> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 8080);
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.socket_timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn builder_sets_identity_headers() {
        let config = ClientConfigBuilder::new()
            .user("alice")
            .catalog("hive")
            .schema("default")
            .timezone("UTC")
            .build()
            .unwrap();
        assert_eq!(config.user.as_deref(), Some("alice"));
        assert_eq!(config.catalog.as_deref(), Some("hive"));
        assert_eq!(config.schema.as_deref(), Some("default"));
        assert_eq!(config.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let result = ClientConfigBuilder::new()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(
            result,
            Err(PrestoClientError::InvalidDuration { field: "poll_interval", .. })
        ));
    }

    #[test]
    fn zero_socket_timeout_rejected() {
        let result = ClientConfigBuilder::new()
            .socket_timeout(Duration::ZERO)
            .build();
        assert!(matches!(
            result,
            Err(PrestoClientError::InvalidDuration { field: "socket_timeout", .. })
        ));
    }

    #[test]
    fn max_retries_zero_is_valid() {
        let config = ClientConfigBuilder::new().max_retries(0).build().unwrap();
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn protocol_default_ports() {
        assert_eq!(Protocol::Http.default_port(), 80);
        assert_eq!(Protocol::Https.default_port(), 443);
        assert_eq!(Protocol::Http.as_str(), "http");
        assert_eq!(Protocol::Https.as_str(), "https");
    }

    #[test]
    fn header_override_preserves_insertion_order() {
        let config = ClientConfigBuilder::new()
            .header("x-custom", "1")
            .header("x-custom", "2")
            .build()
            .unwrap();
        assert_eq!(
            config.headers,
            vec![
                ("x-custom".to_string(), "1".to_string()),
                ("x-custom".to_string(), "2".to_string()),
            ]
        );
    }
}
