//! Wire types for the Presto HTTP statement protocol (v1).
//!
//! Every response in a statement's `nextUri` chain decodes to the same
//! [`QueryResults`] shape; which fields are present depends on how far the
//! query has progressed on the coordinator.

use serde::Deserialize;

use crate::error::Error;

/// One protocol frame, as returned by `POST /v1/statement` and every
/// `GET <nextUri>` that follows.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    /// Query identifier, assigned on the first response.
    pub id: Option<String>,
    /// Link to the coordinator's query UI.
    pub info_uri: Option<String>,
    /// Result schema. Sent once the query is planned, before any data.
    pub columns: Option<Vec<Column>>,
    /// Result rows, positionally aligned with `columns`.
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    /// Absolute URL of the next frame. Absent on the terminal frame.
    pub next_uri: Option<String>,
    /// Query statistics snapshot.
    pub stats: Option<StatementStats>,
    /// Error payload. Its presence ends (or restarts) the statement.
    pub error: Option<QueryError>,
    /// Session mutation marker, e.g. `SET SESSION`.
    pub update_type: Option<String>,
}

/// Column metadata.
///
/// Treated opaquely except for `type_`, which selects the timestamp
/// coercion in [`crate::value`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Presto type signature string, e.g. `varchar`, `timestamp`.
    #[serde(rename = "type")]
    pub type_: String,
}

/// Query statistics, opaque except for the scheduler state.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    /// Coordinator-side query state, e.g. `QUEUED`, `RUNNING`, `FINISHED`.
    pub state: Option<String>,
    /// Remaining statistics, passed through untouched.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Error payload carried inside a 200 response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    /// Human-readable message.
    pub message: Option<String>,
    /// Stable error name, e.g. `SERVER_STARTING_UP`.
    pub error_name: Option<String>,
    /// Error category, e.g. `USER_ERROR`, `INTERNAL_ERROR`.
    pub error_type: Option<String>,
    /// Nested failure cause chain.
    pub failure_info: Option<serde_json::Value>,
}

impl QueryError {
    /// Convert to the crate error type, shaped `"<errorName>: <message>"`.
    pub(crate) fn into_error(self) -> Error {
        Error::Presto {
            code: self.error_name.unwrap_or_else(|| "UNKNOWN".to_string()),
            error_type: self.error_type.unwrap_or_else(|| "UNKNOWN".to_string()),
            message: self.message.unwrap_or_default(),
            info: self.failure_info,
        }
    }
}
