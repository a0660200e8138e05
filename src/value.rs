//! Value deserialization (§4.4)
//!
//! Only timestamp coercion is specified; richer type mapping is an extension
//! point via [`ColumnDecoder`] (§12.3 of `SPEC_FULL.md`).

use crate::protocol::Column;

/// Decodes a single raw JSON value for a given column, in place.
///
/// Implement this to extend value mapping beyond the default timestamp
/// coercion (e.g. decimals, arrays, rows).
pub trait ColumnDecoder: Send + Sync {
    /// Decodes `value` according to `column`'s declared type.
    fn decode(&self, column: &Column, value: serde_json::Value) -> serde_json::Value;
}

/// The default decoder: identity, except `timestamp` columns (§4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl ColumnDecoder for DefaultDecoder {
    fn decode(&self, column: &Column, value: serde_json::Value) -> serde_json::Value {
        if column.type_name == "timestamp" {
            decode_timestamp(value)
        } else {
            value
        }
    }
}

/// Coerces a Presto `timestamp` string into an RFC 3339 instant string.
///
/// Per §4.4: replace the first space with `T` and append `Z`, then parse as
/// an instant. Null values pass through unchanged. Non-string, non-null
/// values pass through unchanged (defensive: a coordinator that sends
/// something unexpected should not panic the client).
///
/// The coerced literal, not a reformatted one, is what's emitted: Presto
/// timestamps carry whatever sub-second precision the coordinator chose
/// (`.0`, `.000`, `.000000`, ...) and re-serializing through a parsed instant
/// would normalize that away. Parsing still happens -- a coerced string that
/// fails to parse as an instant is logged at debug level as a malformed
/// coordinator value, but does not panic the client or change the emitted
/// value.
pub fn decode_timestamp(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Null => serde_json::Value::Null,
        serde_json::Value::String(s) => {
            let coerced = coerce_to_instant_literal(&s);
            if chrono::DateTime::parse_from_rfc3339(&coerced).is_err() {
                tracing::debug!(raw = %s, coerced = %coerced, "timestamp column value did not parse as an instant");
            }
            serde_json::Value::String(coerced)
        }
        other => other,
    }
}

fn coerce_to_instant_literal(s: &str) -> String {
    match s.find(' ') {
        Some(idx) => {
            let mut out = String::with_capacity(s.len() + 1);
            out.push_str(&s[..idx]);
            out.push('T');
            out.push_str(&s[idx + 1..]);
            out.push('Z');
            out
        }
        None => {
            let mut out = s.to_string();
            out.push('Z');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timestamp_column() -> Column {
        Column {
            name: "ts".to_string(),
            type_name: "timestamp".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    fn bigint_column() -> Column {
        Column {
            name: "n".to_string(),
            type_name: "bigint".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn timestamp_replaces_first_space_and_appends_z() {
        let result = decode_timestamp(json!("2024-01-15 10:30:00.000"));
        assert_eq!(result, json!("2024-01-15T10:30:00.000Z"));
    }

    #[test]
    fn timestamp_null_passes_through() {
        assert_eq!(decode_timestamp(json!(null)), json!(null));
    }

    #[test]
    fn timestamp_only_replaces_first_space() {
        // Pathological but exercised: only the first space is touched.
        let result = decode_timestamp(json!("2024-01-15 10:30:00 extra"));
        assert_eq!(result, json!("2024-01-15T10:30:00 extraZ"));
    }

    #[test]
    fn default_decoder_coerces_timestamp_column() {
        let decoder = DefaultDecoder;
        let result = decoder.decode(&timestamp_column(), json!("2024-01-15 10:30:00"));
        assert_eq!(result, json!("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn default_decoder_passes_through_other_columns() {
        let decoder = DefaultDecoder;
        let result = decoder.decode(&bigint_column(), json!(42));
        assert_eq!(result, json!(42));
    }
}
