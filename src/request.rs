//! Request Builder (§4.3)
//!
//! Composes [`PreparedRequest`] descriptors for the three request shapes of
//! the protocol: the initial `POST /v1/statement`, `GET <nextUri>`
//! continuations, and `DELETE /v1/query/{id}` cancellations.

use bytes::Bytes;
use reqwest::Method;

use crate::config::{ClientConfig, Protocol};
use crate::error::Result;
use crate::protocol::Statement;
use crate::session::SessionStore;
use crate::transport::PreparedRequest;

/// Identifies this client on `x-presto-source` and in the `user-agent`.
pub const CLIENT_SOURCE: &str = "lento";

/// Builds the `user-agent` header value for this crate.
pub fn user_agent() -> String {
    format!("{CLIENT_SOURCE} {}", env!("CARGO_PKG_VERSION"))
}

/// Builds the initial `POST /v1/statement` request for `statement`.
pub fn build_statement_request(
    config: &ClientConfig,
    statement: &Statement,
    session: &SessionStore,
    per_request_headers: &[(String, String)],
) -> Result<PreparedRequest> {
    let mut headers = protocol_headers();

    if let Some(catalog) = &config.catalog {
        headers.push(("x-presto-catalog".to_string(), catalog.clone()));
    }
    if let Some(schema) = &config.schema {
        headers.push(("x-presto-schema".to_string(), schema.clone()));
    }
    if let Some(timezone) = &config.timezone {
        headers.push(("x-presto-time-zone".to_string(), timezone.clone()));
    }
    if let Some(user) = &config.user {
        headers.push(("x-presto-user".to_string(), user.clone()));
    }
    if !config.client_tags.is_empty() {
        headers.push(("x-presto-client-tags".to_string(), config.client_tags.join(",")));
    }
    if let Some(info) = &config.client_info {
        headers.push(("x-presto-client-info".to_string(), info.clone()));
    }
    if config.parametric_datetime {
        headers.push((
            "x-presto-client-capabilities".to_string(),
            "PARAMETRIC_DATETIME".to_string(),
        ));
    }
    if let Some(session_header) = session.serialize() {
        headers.push(("x-presto-session".to_string(), session_header));
    }

    merge_overrides(&mut headers, &config.headers);
    merge_overrides(&mut headers, per_request_headers);

    Ok(PreparedRequest {
        method: Method::POST,
        scheme: config.protocol,
        host: config.hostname.clone(),
        port: Some(config.port),
        path_and_query: "/v1/statement".to_string(),
        headers,
        body: Some(Bytes::from(statement.as_str().as_bytes().to_vec())),
        expect_status: 200,
        json_expected: true,
    })
}

/// Builds a `GET <nextUri>` continuation request.
///
/// The scheme is always the *original* statement's scheme, per §4.3: a
/// `nextUri` with a different scheme is honored for host/port/path only.
pub fn build_continuation_request(
    config: &ClientConfig,
    original_scheme: Protocol,
    next_uri: &url::Url,
    per_request_headers: &[(String, String)],
) -> Result<PreparedRequest> {
    let host = next_uri
        .host_str()
        .ok_or_else(|| {
            crate::error::PrestoClientError::Protocol(format!(
                "Presto sent invalid nextUri: {next_uri}"
            ))
        })?
        .to_string();

    let mut path_and_query = next_uri.path().to_string();
    if let Some(q) = next_uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(q);
    }

    let mut headers = protocol_headers();
    merge_overrides(&mut headers, &config.headers);
    merge_overrides(&mut headers, per_request_headers);
    strip_session_header(&mut headers);

    Ok(PreparedRequest {
        method: Method::GET,
        scheme: original_scheme,
        host,
        port: next_uri.port(),
        path_and_query,
        headers,
        body: None,
        expect_status: 200,
        json_expected: true,
    })
}

/// Builds a `DELETE /v1/query/{query_id}` cancellation request.
pub fn build_cancel_request(
    config: &ClientConfig,
    scheme: Protocol,
    host: &str,
    port: Option<u16>,
    query_id: &str,
) -> PreparedRequest {
    let mut headers = vec![
        ("x-presto-source".to_string(), CLIENT_SOURCE.to_string()),
        ("user-agent".to_string(), user_agent()),
        ("connection".to_string(), "keep-alive".to_string()),
    ];
    merge_overrides(&mut headers, &config.headers);
    strip_session_header(&mut headers);

    PreparedRequest {
        method: Method::DELETE,
        scheme,
        host: host.to_string(),
        port,
        path_and_query: format!("/v1/query/{query_id}"),
        headers,
        body: None,
        expect_status: 204,
        json_expected: false,
    }
}

fn protocol_headers() -> Vec<(String, String)> {
    vec![
        ("x-presto-source".to_string(), CLIENT_SOURCE.to_string()),
        ("user-agent".to_string(), user_agent()),
        ("connection".to_string(), "keep-alive".to_string()),
        ("accept-encoding".to_string(), "gzip, deflate, identity".to_string()),
        ("accept".to_string(), "application/json".to_string()),
    ]
}

/// Applies `overrides` onto `base`, case-insensitive, last-wins, preserving
/// `base`'s original positions for keys it already has.
fn merge_overrides(base: &mut Vec<(String, String)>, overrides: &[(String, String)]) {
    for (name, value) in overrides {
        if let Some(existing) = base
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.1 = value.clone();
        } else {
            base.push((name.clone(), value.clone()));
        }
    }
}

fn strip_session_header(headers: &mut Vec<(String, String)>) {
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("x-presto-session"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;
    use crate::session::SessionUpdate;

    fn header(req: &PreparedRequest, name: &str) -> Option<String> {
        req.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    #[test]
    fn statement_request_has_protocol_headers() {
        let config = ClientConfigBuilder::new().build().unwrap();
        let statement = Statement::try_from("SELECT 1").unwrap();
        let session = SessionStore::new();
        let req = build_statement_request(&config, &statement, &session, &[]).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path_and_query, "/v1/statement");
        assert_eq!(header(&req, "x-presto-source").as_deref(), Some("lento"));
        assert_eq!(header(&req, "accept").as_deref(), Some("application/json"));
        assert!(header(&req, "x-presto-session").is_none());
    }

    #[test]
    fn statement_request_includes_identity_headers_when_set() {
        let config = ClientConfigBuilder::new()
            .user("alice")
            .catalog("hive")
            .schema("default")
            .timezone("UTC")
            .parametric_datetime(true)
            .build()
            .unwrap();
        let statement = Statement::try_from("SELECT 1").unwrap();
        let session = SessionStore::new();
        let req = build_statement_request(&config, &statement, &session, &[]).unwrap();
        assert_eq!(header(&req, "x-presto-user").as_deref(), Some("alice"));
        assert_eq!(header(&req, "x-presto-catalog").as_deref(), Some("hive"));
        assert_eq!(header(&req, "x-presto-schema").as_deref(), Some("default"));
        assert_eq!(header(&req, "x-presto-time-zone").as_deref(), Some("UTC"));
        assert_eq!(
            header(&req, "x-presto-client-capabilities").as_deref(),
            Some("PARAMETRIC_DATETIME")
        );
    }

    #[test]
    fn statement_request_carries_session_header_when_non_empty() {
        let config = ClientConfigBuilder::new().build().unwrap();
        let statement = Statement::try_from("SELECT 1").unwrap();
        let mut session = SessionStore::new();
        session.apply(SessionUpdate::Set, "join_distribution_type=BROADCAST");
        let req = build_statement_request(&config, &statement, &session, &[]).unwrap();
        assert_eq!(
            header(&req, "x-presto-session").as_deref(),
            Some("join_distribution_type=BROADCAST")
        );
    }

    #[test]
    fn client_and_per_request_headers_override_case_insensitively() {
        let config = ClientConfigBuilder::new()
            .header("X-Presto-Source", "client-override")
            .build()
            .unwrap();
        let statement = Statement::try_from("SELECT 1").unwrap();
        let session = SessionStore::new();
        let req = build_statement_request(
            &config,
            &statement,
            &session,
            &[("x-presto-source".to_string(), "per-request-override".to_string())],
        )
        .unwrap();
        assert_eq!(
            header(&req, "x-presto-source").as_deref(),
            Some("per-request-override")
        );
    }

    #[test]
    fn continuation_request_preserves_original_scheme() {
        let config = ClientConfigBuilder::new().build().unwrap();
        let next_uri = url::Url::parse("https://other-host:8081/v1/statement/q1/2").unwrap();
        let req = build_continuation_request(&config, Protocol::Http, &next_uri, &[]).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.scheme, Protocol::Http);
        assert_eq!(req.host, "other-host");
        assert_eq!(req.port, Some(8081));
        assert_eq!(req.path_and_query, "/v1/statement/q1/2");
    }

    #[test]
    fn continuation_request_strips_session_header() {
        let config = ClientConfigBuilder::new()
            .header("x-presto-session", "should-not-appear")
            .build()
            .unwrap();
        let next_uri = url::Url::parse("http://localhost:8080/v1/statement/q1/2").unwrap();
        let req = build_continuation_request(&config, Protocol::Http, &next_uri, &[]).unwrap();
        assert!(header(&req, "x-presto-session").is_none());
    }

    #[test]
    fn cancel_request_has_delete_and_expects_204() {
        let config = ClientConfigBuilder::new().build().unwrap();
        let req = build_cancel_request(&config, Protocol::Http, "localhost", Some(8080), "q1");
        assert_eq!(req.method, Method::DELETE);
        assert_eq!(req.path_and_query, "/v1/query/q1");
        assert_eq!(req.expect_status, 204);
        assert!(req.body.is_none());
        assert!(!req.json_expected);
    }
}
