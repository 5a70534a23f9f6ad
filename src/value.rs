//! Row and value types for Presto query results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::RowFormat;
use crate::error::{Error, Result};
use crate::protocol::Column;

/// A single value in a result row.
///
/// Values pass through as the JSON the coordinator sent, except for non-null
/// values of `timestamp` columns, which are parsed into instants.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Parsed value of a `timestamp` column.
    Timestamp(DateTime<Utc>),
    /// Any other value, as received.
    Json(serde_json::Value),
}

impl Value {
    /// Returns the value as a string slice if it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Json(v) => v.as_str(),
            _ => None,
        }
    }

    /// Returns the value as an i64 if it is a JSON integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    /// Returns the value as an f64 if it is a JSON number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    /// Returns the value as a bool if it is a JSON boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// Returns the parsed instant if this is a `Timestamp` value.
    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    /// True if this value is JSON null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(serde_json::Value::Null))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Json(serde_json::Value::String(s)) => write!(f, "{}", s),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A single result row, shaped per [`RowFormat`].
#[derive(Clone, Debug, PartialEq)]
pub enum Row {
    /// Column name to value mapping.
    Object(BTreeMap<String, Value>),
    /// Values in column order.
    Array(Vec<Value>),
}

impl Row {
    /// Get a value by column name (object rows only).
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Object(map) => map.get(name),
            Row::Array(_) => None,
        }
    }

    /// Get a value by column position (array rows only).
    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Array(values) => values.get(index),
            Row::Object(_) => None,
        }
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        match self {
            Row::Object(map) => map.len(),
            Row::Array(values) => values.len(),
        }
    }

    /// True if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All rows decoded from one protocol frame.
pub type Page = Vec<Row>;

/// Coerce one raw cell per its column type.
///
/// Presto serializes `timestamp` values as `"YYYY-MM-DD HH:MM:SS.mmm"`;
/// rewriting the first space to `T` and appending `Z` yields RFC 3339. A
/// value that still does not parse passes through as received.
fn coerce(column: &Column, raw: serde_json::Value) -> Value {
    if column.type_ != "timestamp" {
        return Value::Json(raw);
    }
    match raw {
        serde_json::Value::String(s) => {
            let mut iso = s.replacen(' ', "T", 1);
            iso.push('Z');
            match DateTime::parse_from_rfc3339(&iso) {
                Ok(t) => Value::Timestamp(t.with_timezone(&Utc)),
                Err(_) => Value::Json(serde_json::Value::String(s)),
            }
        }
        other => Value::Json(other),
    }
}

/// Build the rows of one page from a frame's `data` array.
pub(crate) fn build_rows(
    columns: &[Column],
    data: Vec<Vec<serde_json::Value>>,
    format: RowFormat,
) -> Result<Page> {
    let mut rows = Vec::with_capacity(data.len());
    for raw_row in data {
        if raw_row.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "row has {} values but {} columns were declared",
                raw_row.len(),
                columns.len()
            )));
        }
        match format {
            RowFormat::Array => {
                let values = raw_row
                    .into_iter()
                    .zip(columns)
                    .map(|(raw, col)| coerce(col, raw))
                    .collect();
                rows.push(Row::Array(values));
            }
            RowFormat::Object => {
                let mut map = BTreeMap::new();
                for (raw, col) in raw_row.into_iter().zip(columns) {
                    map.insert(col.name.clone(), coerce(col, raw));
                }
                rows.push(Row::Object(map));
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, type_: &str) -> Column {
        Column {
            name: name.to_string(),
            type_: type_.to_string(),
        }
    }

    #[test]
    fn test_timestamp_coercion() {
        let col = column("ts", "timestamp");
        let v = coerce(&col, json!("2023-11-14 12:30:45.123"));
        let t = v.as_timestamp().expect("should parse");
        assert_eq!(t.to_rfc3339(), "2023-11-14T12:30:45.123+00:00");
    }

    #[test]
    fn test_timestamp_null_passes_through() {
        let col = column("ts", "timestamp");
        let v = coerce(&col, json!(null));
        assert!(v.is_null());
    }

    #[test]
    fn test_timestamp_garbage_passes_through() {
        let col = column("ts", "timestamp");
        let v = coerce(&col, json!("not a timestamp"));
        assert_eq!(v.as_str(), Some("not a timestamp"));
    }

    #[test]
    fn test_non_timestamp_untouched() {
        let col = column("s", "varchar");
        let v = coerce(&col, json!("2023-11-14 12:30:45.123"));
        assert_eq!(v.as_str(), Some("2023-11-14 12:30:45.123"));
    }

    #[test]
    fn test_build_rows_object() {
        let columns = vec![column("a", "bigint"), column("b", "varchar")];
        let rows = build_rows(
            &columns,
            vec![vec![json!(1), json!("x")], vec![json!(2), json!("y")]],
            RowFormat::Object,
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("a").unwrap().as_i64(), Some(1));
        assert_eq!(rows[1].get("b").unwrap().as_str(), Some("y"));
    }

    #[test]
    fn test_build_rows_array() {
        let columns = vec![column("a", "bigint")];
        let rows = build_rows(&columns, vec![vec![json!(7)]], RowFormat::Array).unwrap();
        assert_eq!(rows[0].at(0).unwrap().as_i64(), Some(7));
        assert_eq!(rows[0].get("a"), None);
    }

    #[test]
    fn test_build_rows_width_mismatch() {
        let columns = vec![column("a", "bigint")];
        let result = build_rows(&columns, vec![vec![json!(1), json!(2)]], RowFormat::Array);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Json(json!("s")).as_str(), Some("s"));
        assert_eq!(Value::Json(json!(42)).as_i64(), Some(42));
        assert_eq!(Value::Json(json!(1.5)).as_f64(), Some(1.5));
        assert_eq!(Value::Json(json!(true)).as_bool(), Some(true));
        assert!(Value::Json(json!(null)).is_null());

        // Wrong type returns None
        assert_eq!(Value::Json(json!(42)).as_str(), None);
        assert_eq!(Value::Json(json!("s")).as_i64(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Json(json!("hello")).to_string(), "hello");
        assert_eq!(Value::Json(json!(42)).to_string(), "42");
        assert_eq!(Value::Json(json!(null)).to_string(), "null");
    }
}
