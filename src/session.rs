//! Session property store
//!
//! Accumulates and serializes Presto session properties set by `SET SESSION`
//! / cleared by `RESET SESSION`, as carried on `x-presto-set-session` /
//! `x-presto-clear-session` response headers.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PrestoClientError, Result};

/// Ordered mapping from session property name to the exact `key=value`
/// string received from the coordinator.
///
/// Insertion order is preserved on [`SessionStore::serialize`], matching the
/// wire-level contract: the store is a small, bounded set of distinct
/// session keys, so a `Vec` scanned linearly is the right structure --
/// no hash map is needed to keep `get`/`set` fast at realistic sizes.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    entries: Vec<(String, String)>,
}

/// Which header a response update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    /// `x-presto-set-session: key=value`
    Set,
    /// `x-presto-clear-session: key`
    Clear,
}

impl SessionStore {
    /// Creates an empty session store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or overwrites the exact `key=value` string under `key`.
    ///
    /// If `key` already exists, its value is overwritten in place,
    /// preserving its original position so insertion order reflects first
    /// appearance, matching the spec's "insertion order preserved" rule for
    /// repeated `SET SESSION`s of the same key.
    pub fn set(&mut self, key: &str, raw_key_value: impl Into<String>) {
        let raw = raw_key_value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = raw;
        } else {
            self.entries.push((key.to_string(), raw));
        }
    }

    /// Removes `key`, if present.
    pub fn clear(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Applies one `x-presto-set-session` or `x-presto-clear-session` header
    /// value, per §4.2.
    ///
    /// `header_value` for `Set` must be the exact `key=value` string; for
    /// `Clear` it is just the key name.
    pub fn apply(&mut self, update: SessionUpdate, header_value: &str) {
        match update {
            SessionUpdate::Set => {
                if let Some((key, _)) = header_value.split_once('=') {
                    self.set(key, header_value);
                }
            }
            SessionUpdate::Clear => {
                self.clear(header_value.trim());
            }
        }
    }

    /// Returns the comma-join of all values in insertion order, or `None` if
    /// the store is empty.
    pub fn serialize(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Returns a snapshot of the current `(key, value)` pairs in insertion
    /// order (§11.3 supplement).
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }

    /// True if no session properties are currently set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validates a caller-supplied session key against `^[a-z]+[a-z_.]*[a-z]+$`.
///
/// # Errors
///
/// Returns [`PrestoClientError::InvalidSessionKey`] if the key does not
/// match.
pub fn validate_session_key(key: &str) -> Result<()> {
    if is_valid_session_key(key) {
        Ok(())
    } else {
        Err(PrestoClientError::InvalidSessionKey(key.to_string()))
    }
}

fn is_valid_session_key(key: &str) -> bool {
    static SESSION_KEY: OnceLock<Regex> = OnceLock::new();
    SESSION_KEY
        .get_or_init(|| Regex::new(r"^[a-z]+[a-z_.]*[a-z]+$").unwrap())
        .is_match(key)
}

/// A validated session value: string, integer, float, or boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    /// A string value.
    Str(String),
    /// A numeric value (must be finite).
    Number(f64),
    /// A boolean value.
    Bool(bool),
}

impl SessionValue {
    /// Formats this value the way it appears on the wire (`x-presto-session`).
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Validates a caller-supplied session value per §7.
///
/// # Errors
///
/// Returns [`PrestoClientError::InvalidSessionValue`] if `value` is a
/// non-finite number.
pub fn validate_session_value(key: &str, value: &SessionValue) -> Result<()> {
    if let SessionValue::Number(n) = value {
        if !n.is_finite() {
            return Err(PrestoClientError::InvalidSessionValue {
                key: key.to_string(),
                reason: "numeric session value must be finite".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_serialize_single_key() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "join_distribution_type=BROADCAST");
        assert_eq!(
            store.serialize(),
            Some("join_distribution_type=BROADCAST".to_string())
        );
    }

    #[test]
    fn serialize_preserves_insertion_order() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "b=2");
        store.apply(SessionUpdate::Set, "a=1");
        assert_eq!(store.serialize(), Some("b=2,a=1".to_string()));
    }

    #[test]
    fn repeated_set_overwrites_in_place() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "a=1");
        store.apply(SessionUpdate::Set, "b=2");
        store.apply(SessionUpdate::Set, "a=99");
        assert_eq!(store.serialize(), Some("a=99,b=2".to_string()));
    }

    #[test]
    fn clear_removes_key() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "a=1");
        store.apply(SessionUpdate::Set, "b=2");
        store.apply(SessionUpdate::Clear, "a");
        assert_eq!(store.serialize(), Some("b=2".to_string()));
    }

    #[test]
    fn empty_store_serializes_to_none() {
        let store = SessionStore::new();
        assert_eq!(store.serialize(), None);
    }

    #[test]
    fn clear_then_empty_serializes_to_none() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "a=1");
        store.apply(SessionUpdate::Clear, "a");
        assert_eq!(store.serialize(), None);
    }

    #[test]
    fn valid_session_keys_accepted() {
        assert!(validate_session_key("join_distribution_type").is_ok());
        assert!(validate_session_key("hash.partition_count").is_ok());
        assert!(validate_session_key("ab").is_ok());
    }

    #[test]
    fn invalid_session_keys_rejected() {
        assert!(validate_session_key("A").is_err());
        assert!(validate_session_key("a").is_err());
        assert!(validate_session_key("1abc").is_err());
        assert!(validate_session_key("abc1").is_err());
        assert!(validate_session_key("").is_err());
        assert!(validate_session_key("_abc_").is_err());
    }

    #[test]
    fn non_finite_session_value_rejected() {
        let result = validate_session_value("x", &SessionValue::Number(f64::NAN));
        assert!(result.is_err());
        let result = validate_session_value("x", &SessionValue::Number(f64::INFINITY));
        assert!(result.is_err());
    }

    #[test]
    fn finite_session_value_accepted() {
        assert!(validate_session_value("x", &SessionValue::Number(42.0)).is_ok());
        assert!(validate_session_value("x", &SessionValue::Bool(true)).is_ok());
        assert!(validate_session_value("x", &SessionValue::Str("y".into())).is_ok());
    }

    #[test]
    fn session_value_wire_string_formatting() {
        assert_eq!(SessionValue::Str("foo".into()).to_wire_string(), "foo");
        assert_eq!(SessionValue::Number(42.0).to_wire_string(), "42");
        assert_eq!(SessionValue::Bool(true).to_wire_string(), "true");
    }

    #[test]
    fn snapshot_returns_insertion_ordered_pairs() {
        let mut store = SessionStore::new();
        store.apply(SessionUpdate::Set, "a=1");
        store.apply(SessionUpdate::Set, "b=2");
        assert_eq!(
            store.snapshot(),
            vec![
                ("a".to_string(), "a=1".to_string()),
                ("b".to_string(), "b=2".to_string()),
            ]
        );
    }
}
