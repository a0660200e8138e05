//! Wire types for the Presto/Trino HTTP statement protocol
//!
//! These mirror the JSON shapes exchanged with the coordinator (§6) and the
//! client-facing row/page/column types from §3.

use serde::{Deserialize, Serialize};

/// The SQL text of one statement. Must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement(String);

impl Statement {
    /// Returns the raw SQL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes `self`, returning the owned SQL text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Statement {
    type Error = crate::error::PrestoClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(crate::error::PrestoClientError::EmptyStatement)
        } else {
            Ok(Statement(value))
        }
    }
}

impl TryFrom<&str> for Statement {
    type Error = crate::error::PrestoClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Statement::try_from(value.to_string())
    }
}

impl TryFrom<Vec<u8>> for Statement {
    type Error = crate::error::PrestoClientError;

    /// Per §3, a statement may be supplied as bytes as well as text. The
    /// bytes must be valid UTF-8 SQL text; non-UTF-8 input is treated as
    /// empty-equivalent (there is nothing sensible to submit as a statement).
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(crate::error::PrestoClientError::EmptyStatement);
        }
        String::from_utf8(value)
            .map_err(|_| crate::error::PrestoClientError::EmptyStatement)
            .and_then(Statement::try_from)
    }
}

impl TryFrom<&[u8]> for Statement {
    type Error = crate::error::PrestoClientError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Statement::try_from(value.to_vec())
    }
}

/// Column metadata as returned by the coordinator.
///
/// All fields beyond `name` and `type_name` are treated opaquely by this
/// crate per §3; coordinators may include additional fields
/// (`typeSignature`, etc.) which round-trip through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type name (e.g. `"bigint"`, `"timestamp"`).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Any additional fields the coordinator included, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Statement execution stats, as returned by `result.stats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatementStats {
    /// Coarse-grained execution state (`"QUEUED"`, `"RUNNING"`, etc.).
    pub state: String,
    /// Any other stats fields, preserved verbatim (node counts, timings...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A Presto-level error, carried in a `200 application/json` body under
/// `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestoErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error name (e.g. `"SERVER_STARTING_UP"`).
    #[serde(rename = "errorName")]
    pub error_name: String,
    /// Coarse category (e.g. `"INTERNAL_ERROR"`, `"USER_ERROR"`).
    #[serde(rename = "errorType")]
    pub error_type: String,
    /// Optional stack/failure detail.
    #[serde(rename = "failureInfo", skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<serde_json::Value>,
}

/// One frame of the protocol response (`POST /v1/statement` or `GET <nextUri>`).
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResults {
    /// Query ID, present once assigned by the coordinator.
    pub id: Option<String>,
    /// Informational UI URI.
    #[serde(rename = "infoUri")]
    pub info_uri: Option<String>,
    /// Column metadata, present once the coordinator knows the result shape.
    pub columns: Option<Vec<Column>>,
    /// Raw row data for this frame.
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    /// URI to fetch the next frame, absent when the statement is finished.
    #[serde(rename = "nextUri")]
    pub next_uri: Option<String>,
    /// Execution stats.
    pub stats: Option<StatementStats>,
    /// Presto-level error, if this frame represents a failure.
    pub error: Option<PrestoErrorBody>,
    /// `"SET SESSION"` / `"RESET SESSION"` marker for session header handling.
    #[serde(rename = "updateType")]
    pub update_type: Option<String>,
}

/// One row of a result page, in either array or object shape (`RowFormat`).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Row {
    /// Values aligned positionally with `columns`.
    Array(Vec<serde_json::Value>),
    /// Values keyed by column name.
    Object(serde_json::Map<String, serde_json::Value>),
}

/// A non-empty ordered sequence of rows received from one HTTP response,
/// or a slice thereof after `page_size` chunking.
pub type Page = Vec<Row>;

/// Selects whether rows are delivered as arrays or as name-keyed objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFormat {
    /// `{columns[i].name: value}` objects (default).
    #[default]
    Object,
    /// Plain arrays aligned with `columns`.
    Array,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_rejects_empty() {
        assert!(Statement::try_from("").is_err());
        assert!(Statement::try_from(String::new()).is_err());
        assert!(Statement::try_from(Vec::<u8>::new()).is_err());
        assert!(Statement::try_from(&b""[..]).is_err());
    }

    #[test]
    fn statement_accepts_bytes() {
        let stmt = Statement::try_from(b"SELECT 1".to_vec()).unwrap();
        assert_eq!(stmt.as_str(), "SELECT 1");
        let stmt = Statement::try_from(&b"SELECT 2"[..]).unwrap();
        assert_eq!(stmt.as_str(), "SELECT 2");
    }

    #[test]
    fn statement_rejects_non_utf8_bytes() {
        assert!(Statement::try_from(vec![0xff, 0xfe, 0xfd]).is_err());
    }

    #[test]
    fn statement_accepts_non_empty() {
        let stmt = Statement::try_from("SELECT 1").unwrap();
        assert_eq!(stmt.as_str(), "SELECT 1");
    }

    #[test]
    fn query_results_deserializes_minimal_frame() {
        let json = r#"{"id":"q1","columns":[{"name":"a","type":"bigint"}],"data":[[1]]}"#;
        let parsed: QueryResults = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("q1"));
        assert_eq!(parsed.columns.unwrap()[0].name, "a");
        assert_eq!(parsed.data.unwrap(), vec![vec![serde_json::json!(1)]]);
    }

    #[test]
    fn query_results_deserializes_presto_error() {
        let json = r#"{"error":{"message":"boom","errorName":"SERVER_STARTING_UP","errorType":"INTERNAL_ERROR"}}"#;
        let parsed: QueryResults = serde_json::from_str(json).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.error_name, "SERVER_STARTING_UP");
        assert_eq!(err.message, "boom");
        assert!(err.failure_info.is_none());
    }

    #[test]
    fn row_format_default_is_object() {
        assert_eq!(RowFormat::default(), RowFormat::Object);
    }
}
