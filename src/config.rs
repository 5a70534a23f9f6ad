//! Client and per-statement configuration.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::QueryObserver;

/// Presto error names that restart the statement when no rows have been
/// delivered yet.
pub const DEFAULT_RETRYABLE_ERROR_NAMES: [&str; 4] = [
    "SERVER_STARTING_UP",
    "HIVE_METASTORE_ERROR",
    "TOO_MANY_REQUESTS_FAILED",
    "PAGE_TRANSPORT_TIMEOUT",
];

/// Scheme used to reach the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP (default).
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// The URL scheme string.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Configuration for a [`Client`](crate::Client).
///
/// All fields have defaults; use the `with_*` methods to override:
///
/// ```ignore
/// use presto_stream::{Client, ClientConfig};
///
/// let client = Client::new(
///     ClientConfig::new("coordinator.example.com", 8443)
///         .with_protocol(presto_stream::Protocol::Https)
///         .with_user("alice")
///         .with_catalog("hive")
///         .with_schema("default"),
/// )?;
/// ```
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Coordinator hostname. Default `localhost`.
    pub hostname: String,
    /// Coordinator port. Default `8080`.
    pub port: u16,
    /// `http` or `https`. Default `http`.
    pub protocol: Protocol,
    /// Value for `x-presto-user`.
    pub user: Option<String>,
    /// Value for `x-presto-catalog`.
    pub catalog: Option<String>,
    /// Value for `x-presto-schema`.
    pub schema: Option<String>,
    /// Value for `x-presto-time-zone`.
    pub timezone: Option<String>,
    /// Advertise the `PARAMETRIC_DATETIME` client capability.
    pub parametric_datetime: bool,
    /// Wait between polls of an unchanged `nextUri`. Default 1 s.
    pub poll_interval: Duration,
    /// Per-request idle timeout. Default 120 s.
    pub socket_timeout: Duration,
    /// Total retry budget, shared between transport retries and query
    /// restarts. `0` disables retries entirely. Default 10.
    pub max_retries: u32,
    /// Extra headers applied to every request, last-wins by
    /// case-insensitive name.
    pub headers: Vec<(String, String)>,
    /// Presto error names eligible for a query-level restart.
    pub retryable_error_names: HashSet<String>,
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
            parametric_datetime: false,
            poll_interval: Duration::from_secs(1),
            socket_timeout: Duration::from_secs(120),
            max_retries: 10,
            headers: Vec::new(),
            retryable_error_names: DEFAULT_RETRYABLE_ERROR_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ClientConfig {
    /// Configuration targeting `hostname:port` over plain HTTP.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the scheme.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set `x-presto-user`.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set `x-presto-catalog`.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Set `x-presto-schema`.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set `x-presto-time-zone`.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Advertise `PARAMETRIC_DATETIME` support.
    pub fn with_parametric_datetime(mut self) -> Self {
        self.parametric_datetime = true;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request idle timeout.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Add an extra header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidPort);
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidDuration("pollInterval"));
        }
        if self.socket_timeout.is_zero() {
            return Err(Error::InvalidDuration("socketTimeout"));
        }
        Ok(())
    }
}

/// Shape of the rows a statement emits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowFormat {
    /// Rows are maps keyed by column name (default).
    #[default]
    Object,
    /// Rows are positional arrays aligned with the column list.
    Array,
}

/// Per-statement options.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Row shape. Default [`RowFormat::Object`].
    pub row_format: RowFormat,
    /// Maximum rows per emitted page (page mode only). `0` disables slicing.
    pub page_size: usize,
    /// Downstream buffer target, in pages. Default 16.
    pub high_water_mark: usize,
    /// Extra headers for this statement, merged after the client's.
    pub headers: Vec<(String, String)>,
    /// Observer for protocol events.
    pub observer: Option<Arc<dyn QueryObserver>>,
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("row_format", &self.row_format)
            .field("page_size", &self.page_size)
            .field("high_water_mark", &self.high_water_mark)
            .field("headers", &self.headers)
            .field("observer", &self.observer.as_ref().map(|_| "..."))
            .finish()
    }
}

impl QueryOptions {
    /// Options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the row shape.
    pub fn with_row_format(mut self, format: RowFormat) -> Self {
        self.row_format = format;
        self
    }

    /// Set the page slicing threshold.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the downstream buffer target in pages.
    pub fn with_high_water_mark(mut self, pages: usize) -> Self {
        self.high_water_mark = pages;
        self
    }

    /// Add a header for this statement only.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach an observer for protocol events.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub(crate) fn buffer_capacity(&self) -> usize {
        if self.high_water_mark == 0 {
            16
        } else {
            self.high_water_mark
        }
    }
}
