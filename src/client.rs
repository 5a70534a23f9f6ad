//! Presto streaming client.
//!
//! This module provides the main `Client` type for executing SQL statements
//! against a Presto (or Trino v1 protocol) coordinator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use reqwest::redirect;
use tokio::sync::mpsc;

use crate::config::{ClientConfig, QueryOptions};
use crate::engine::{CancelState, QueryEngine};
use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::request::RequestBuilder;
use crate::session::{validate_session_key, SessionStore, SessionValue};
use crate::stream::{PageStream, RowStream};
use crate::transport::Transport;
use crate::value::Row;

/// Presto streaming client.
///
/// The client submits statements with `POST /v1/statement`, follows the
/// protocol's `nextUri` chain, and delivers rows as a lazy, back-pressured
/// stream. Session properties set through `SET SESSION` accumulate on the
/// client and are attached to subsequent statements.
///
/// Statements on one client are independent and may run concurrently; the
/// session store is the only shared state.
///
/// # Example
///
/// ```ignore
/// use presto_stream::{Client, ClientConfig};
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new(
///         ClientConfig::new("localhost", 8080).with_user("alice"),
///     )?;
///
///     let mut rows = client.query_stream("SELECT orderkey FROM orders")?;
///     while let Some(row) = rows.next().await {
///         println!("{:?}", row?);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    session: Arc<Mutex<SessionStore>>,
    origin: reqwest::Url,
}

impl Client {
    /// Create a new client.
    ///
    /// Builds the underlying HTTP client with redirect following disabled
    /// (307 handling is part of the protocol implementation) and the
    /// configured socket timeout as its per-request idle timeout.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(config.socket_timeout)
            .read_timeout(config.socket_timeout)
            .build()?;
        Self::with_http_client(http, config)
    }

    /// Create a client over a custom `reqwest::Client`.
    ///
    /// This allows you to configure proxies, TLS settings, pool behavior,
    /// etc. The client should keep redirect following disabled; a provided
    /// client's own timeout settings replace `socket_timeout`.
    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let origin = RequestBuilder::origin(&config)?;
        Ok(Self {
            http,
            config: Arc::new(config),
            session: Arc::new(Mutex::new(SessionStore::new())),
            origin,
        })
    }

    /// Execute a statement, streaming the result row by row.
    ///
    /// Must be called within a Tokio runtime: the protocol is driven by a
    /// background task that this call spawns.
    pub fn query_stream(&self, sql: impl Into<String>) -> Result<RowStream> {
        self.query_stream_with(sql, QueryOptions::new())
    }

    /// Execute a statement with per-statement options, streaming rows.
    ///
    /// `page_size` is ignored in row mode.
    pub fn query_stream_with(
        &self,
        sql: impl Into<String>,
        options: QueryOptions,
    ) -> Result<RowStream> {
        Ok(RowStream::new(self.spawn(sql.into(), options, 0)?))
    }

    /// Execute a statement, streaming the result page by page.
    pub fn page_stream(&self, sql: impl Into<String>) -> Result<PageStream> {
        self.page_stream_with(sql, QueryOptions::new())
    }

    /// Execute a statement with per-statement options, streaming pages.
    pub fn page_stream_with(
        &self,
        sql: impl Into<String>,
        options: QueryOptions,
    ) -> Result<PageStream> {
        let page_size = options.page_size;
        self.spawn(sql.into(), options, page_size)
    }

    /// Execute a statement and collect all rows.
    ///
    /// **Warning**: This loads the whole result into memory. For large
    /// result sets, use [`query_stream`](Self::query_stream) instead.
    pub async fn query(&self, sql: impl Into<String>) -> Result<Vec<Row>> {
        let mut stream = self.query_stream(sql)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Execute a statement to completion, discarding any rows.
    ///
    /// Useful for DDL and session statements where only success matters.
    pub async fn execute(&self, sql: impl Into<String>) -> Result<()> {
        let mut stream = self.page_stream(sql)?;
        while let Some(page) = stream.next().await {
            page?;
        }
        Ok(())
    }

    /// Set a session property by running `SET SESSION key=value`.
    ///
    /// The property takes effect for statements submitted after this call
    /// returns. Keys must match `^[a-z]+[a-z_.]*[a-z]+$`; string values are
    /// quoted as SQL literals, floats must be finite.
    ///
    /// ```ignore
    /// client.set_session("query_priority", 1).await?;
    /// client.set_session("resource_group", "adhoc").await?;
    /// ```
    pub async fn set_session(
        &self,
        key: &str,
        value: impl Into<SessionValue>,
    ) -> Result<()> {
        validate_session_key(key)?;
        let literal = value.into().to_sql()?;
        self.execute(format!("SET SESSION {key}={literal}")).await
    }

    /// Clear a session property by running `RESET SESSION key`.
    pub async fn reset_session(&self, key: &str) -> Result<()> {
        validate_session_key(key)?;
        self.execute(format!("RESET SESSION {key}")).await
    }

    /// Set the coordinator-side `query_max_run_time` for this session.
    pub async fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidDuration("timeout"));
        }
        self.set_session(
            "query_max_run_time",
            SessionValue::String(format!("{}ms", timeout.as_millis())),
        )
        .await
    }

    /// Clear the session `query_max_run_time`.
    pub async fn reset_timeout(&self) -> Result<()> {
        self.reset_session("query_max_run_time").await
    }

    /// Current session properties as `(key, "key=value")` pairs, in the
    /// order the coordinator set them.
    pub fn session(&self) -> Vec<(String, String)> {
        self.session.lock().expect("session lock").snapshot()
    }

    fn spawn(&self, sql: String, options: QueryOptions, page_size: usize) -> Result<PageStream> {
        if sql.is_empty() {
            return Err(Error::EmptySql);
        }
        let (tx, rx) = mpsc::channel(options.buffer_capacity());
        let cancel = CancelState::new();
        let requests = RequestBuilder::new(
            self.config.clone(),
            self.session.clone(),
            self.origin.clone(),
            options.headers,
        );
        let engine = QueryEngine::new(
            Transport::new(self.http.clone()),
            requests,
            self.session.clone(),
            self.config.clone(),
            Emitter::new(options.observer),
            tx,
            cancel.clone(),
            sql,
            options.row_format,
        );
        tokio::spawn(engine.run());
        Ok(PageStream::new(rx, cancel, page_size))
    }
}
