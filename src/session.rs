//! Session property accumulation.
//!
//! The coordinator acknowledges `SET SESSION` / `RESET SESSION` statements
//! through the `x-presto-set-session` / `x-presto-clear-session` response
//! headers; the store mirrors them and serializes back into the
//! `x-presto-session` request header on every statement POST.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::HeaderMap;

use crate::error::{Error, Result};

pub(crate) const HEADER_SESSION: &str = "x-presto-session";
pub(crate) const HEADER_SET_SESSION: &str = "x-presto-set-session";
pub(crate) const HEADER_CLEAR_SESSION: &str = "x-presto-clear-session";

static SESSION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z]+[a-z_.]*[a-z]+$").unwrap());

/// Validate a session property name against the coordinator's grammar.
pub(crate) fn validate_session_key(key: &str) -> Result<()> {
    if SESSION_KEY.is_match(key) {
        Ok(())
    } else {
        Err(Error::InvalidSessionKey(key.to_string()))
    }
}

/// A value accepted by [`Client::set_session`](crate::Client::set_session).
#[derive(Clone, Debug, PartialEq)]
pub enum SessionValue {
    /// String, rendered as a single-quoted SQL literal.
    String(String),
    /// Integer, rendered bare.
    Integer(i64),
    /// Float, rendered bare. Must be finite.
    Float(f64),
    /// Boolean, rendered as `true`/`false`.
    Bool(bool),
}

impl SessionValue {
    /// Render as a SQL literal for a `SET SESSION` statement.
    pub(crate) fn to_sql(&self) -> Result<String> {
        match self {
            SessionValue::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
            SessionValue::Integer(i) => Ok(i.to_string()),
            SessionValue::Float(f) => {
                if f.is_finite() {
                    Ok(f.to_string())
                } else {
                    Err(Error::NonFiniteSessionValue(*f))
                }
            }
            SessionValue::Bool(b) => Ok(b.to_string()),
        }
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        SessionValue::String(s.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        SessionValue::String(s)
    }
}

impl From<i64> for SessionValue {
    fn from(i: i64) -> Self {
        SessionValue::Integer(i)
    }
}

impl From<f64> for SessionValue {
    fn from(f: f64) -> Self {
        SessionValue::Float(f)
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        SessionValue::Bool(b)
    }
}

/// Insertion-ordered map of session property name to the exact `key=value`
/// string the coordinator sent.
#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    entries: Vec<(String, String)>,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply the session side effects of one successful response.
    ///
    /// Only statements whose frame carried the matching `updateType` mutate
    /// the store.
    pub(crate) fn apply(&mut self, headers: &HeaderMap, update_type: Option<&str>) {
        match update_type {
            Some("SET SESSION") => {
                for value in headers.get_all(HEADER_SET_SESSION) {
                    let Ok(pair) = value.to_str() else { continue };
                    let Some((key, _)) = pair.split_once('=') else {
                        continue;
                    };
                    self.set(key, pair);
                }
            }
            Some("RESET SESSION") => {
                for value in headers.get_all(HEADER_CLEAR_SESSION) {
                    let Ok(key) = value.to_str() else { continue };
                    self.entries.retain(|(k, _)| k != key);
                }
            }
            _ => {}
        }
    }

    /// Comma-join of all `key=value` strings in insertion order, or `None`
    /// when the store is empty.
    pub(crate) fn serialize(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|(_, pair)| pair.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Current `(key, "key=value")` pairs in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }

    fn set(&mut self, key: &str, pair: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = pair.to_string(),
            None => self.entries.push((key.to_string(), pair.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_set_and_serialize_preserves_order() {
        let mut store = SessionStore::new();
        store.apply(&headers(HEADER_SET_SESSION, "b=2"), Some("SET SESSION"));
        store.apply(&headers(HEADER_SET_SESSION, "a=1"), Some("SET SESSION"));
        assert_eq!(store.serialize().as_deref(), Some("b=2,a=1"));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut store = SessionStore::new();
        store.apply(&headers(HEADER_SET_SESSION, "a=1"), Some("SET SESSION"));
        store.apply(&headers(HEADER_SET_SESSION, "b=2"), Some("SET SESSION"));
        store.apply(&headers(HEADER_SET_SESSION, "a=3"), Some("SET SESSION"));
        assert_eq!(store.serialize().as_deref(), Some("a=3,b=2"));
    }

    #[test]
    fn test_reset_removes_key() {
        let mut store = SessionStore::new();
        store.apply(&headers(HEADER_SET_SESSION, "a=1"), Some("SET SESSION"));
        store.apply(&headers(HEADER_CLEAR_SESSION, "a"), Some("RESET SESSION"));
        assert_eq!(store.serialize(), None);
    }

    #[test]
    fn test_ignored_without_update_type() {
        let mut store = SessionStore::new();
        store.apply(&headers(HEADER_SET_SESSION, "a=1"), None);
        store.apply(&headers(HEADER_SET_SESSION, "a=1"), Some("INSERT"));
        assert_eq!(store.serialize(), None);
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_session_key("query_max_run_time").is_ok());
        assert!(validate_session_key("hive.insert_existing_partitions_behavior").is_ok());
        assert!(validate_session_key("ab").is_ok());

        assert!(validate_session_key("").is_err());
        assert!(validate_session_key("a").is_err());
        assert!(validate_session_key("Upper").is_err());
        assert!(validate_session_key("trailing_").is_err());
        assert!(validate_session_key("1leading").is_err());
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(
            SessionValue::from("o'brien").to_sql().unwrap(),
            "'o''brien'"
        );
        assert_eq!(SessionValue::from(42i64).to_sql().unwrap(), "42");
        assert_eq!(SessionValue::from(true).to_sql().unwrap(), "true");
        assert!(SessionValue::from(f64::NAN).to_sql().is_err());
        assert!(SessionValue::from(f64::INFINITY).to_sql().is_err());
    }
}
