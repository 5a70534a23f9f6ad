//! Outgoing request composition.
//!
//! Builds the three request shapes of the statement protocol: the initial
//! `POST /v1/statement`, `GET <nextUri>` continuations, and the
//! `DELETE /v1/query/{id}` cancellation. Header layering: protocol headers
//! first, then client-level extras, then per-statement extras, last-wins by
//! case-insensitive name.

use std::sync::{Arc, Mutex};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, StatusCode, Url};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::{SessionStore, HEADER_SESSION};

const SOURCE: &str = env!("CARGO_PKG_NAME");
const USER_AGENT_VALUE: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// A fully composed request, ready for the transport.
#[derive(Clone, Debug)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub expect_status: StatusCode,
}

/// Composes requests for one statement.
pub(crate) struct RequestBuilder {
    config: Arc<ClientConfig>,
    session: Arc<Mutex<SessionStore>>,
    origin: Url,
    statement_headers: Vec<(String, String)>,
}

impl RequestBuilder {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        session: Arc<Mutex<SessionStore>>,
        origin: Url,
        statement_headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            config,
            session,
            origin,
            statement_headers,
        }
    }

    /// The coordinator origin URL for a configuration.
    pub(crate) fn origin(config: &ClientConfig) -> Result<Url> {
        Url::parse(&format!(
            "{}://{}:{}/",
            config.protocol.scheme(),
            config.hostname,
            config.port
        ))
        .map_err(|e| Error::Protocol(format!("invalid coordinator address: {e}")))
    }

    /// The initial `POST /v1/statement`.
    pub(crate) fn statement(&self, sql: &str) -> Result<PreparedRequest> {
        let url = self
            .origin
            .join("/v1/statement")
            .map_err(|e| Error::Protocol(format!("invalid coordinator address: {e}")))?;
        Ok(PreparedRequest {
            headers: self.headers(&Method::POST)?,
            method: Method::POST,
            url,
            body: Some(sql.to_string()),
            expect_status: StatusCode::OK,
        })
    }

    /// A `GET <nextUri>` continuation.
    ///
    /// The scheme always stays the statement's own; a `nextUri` pointing at a
    /// different scheme is honored for host, port and path only.
    pub(crate) fn continuation(&self, raw_next_uri: &str) -> Result<PreparedRequest> {
        let mut url = Url::parse(raw_next_uri)
            .map_err(|_| Error::Protocol(format!("Presto sent invalid nextUri: {raw_next_uri}")))?;
        if url.scheme() != self.origin.scheme() {
            let port = url.port();
            url.set_scheme(self.origin.scheme()).map_err(|_| {
                Error::Protocol(format!("Presto sent invalid nextUri: {raw_next_uri}"))
            })?;
            // set_scheme between http and https clears an explicit default
            // port; put it back so the target stays the same.
            if port.is_some() && url.port() != port {
                let _ = url.set_port(port);
            }
        }
        Ok(PreparedRequest {
            headers: self.headers(&Method::GET)?,
            method: Method::GET,
            url,
            body: None,
            expect_status: StatusCode::OK,
        })
    }

    /// The `DELETE /v1/query/{id}` cancellation, sent to the client's
    /// configured origin.
    pub(crate) fn cancel(&self, query_id: &str) -> Result<PreparedRequest> {
        let url = self
            .origin
            .join(&format!("/v1/query/{query_id}"))
            .map_err(|e| Error::Protocol(format!("invalid query id {query_id:?}: {e}")))?;
        Ok(PreparedRequest {
            headers: self.headers(&Method::DELETE)?,
            method: Method::DELETE,
            url,
            body: None,
            expect_status: StatusCode::NO_CONTENT,
        })
    }

    fn headers(&self, method: &Method) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-presto-source", HeaderValue::from_static(SOURCE));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let optional = [
            ("x-presto-catalog", &self.config.catalog),
            ("x-presto-schema", &self.config.schema),
            ("x-presto-time-zone", &self.config.timezone),
            ("x-presto-user", &self.config.user),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                headers.insert(name, encode_value(name, value)?);
            }
        }
        if self.config.parametric_datetime {
            headers.insert(
                "x-presto-client-capabilities",
                HeaderValue::from_static("PARAMETRIC_DATETIME"),
            );
        }
        if *method == Method::POST {
            let serialized = self.session.lock().expect("session lock").serialize();
            if let Some(serialized) = serialized {
                headers.insert(HEADER_SESSION, encode_value(HEADER_SESSION, &serialized)?);
            }
        }

        for (name, value) in self
            .config
            .headers
            .iter()
            .chain(self.statement_headers.iter())
        {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidHeader { name: name.clone() })?;
            headers.insert(header_name, encode_value(name, value)?);
        }

        // The session header travels on statement POSTs only, even when a
        // caller supplied it explicitly.
        if *method != Method::POST {
            headers.remove(HEADER_SESSION);
        }
        Ok(headers)
    }
}

fn encode_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn builder(config: ClientConfig, extra: Vec<(String, String)>) -> RequestBuilder {
        let origin = RequestBuilder::origin(&config).unwrap();
        RequestBuilder::new(
            Arc::new(config),
            Arc::new(Mutex::new(SessionStore::new())),
            origin,
            extra,
        )
    }

    fn builder_with_session(config: ClientConfig) -> RequestBuilder {
        let origin = RequestBuilder::origin(&config).unwrap();
        let session = Arc::new(Mutex::new(SessionStore::new()));
        {
            let mut map = HeaderMap::new();
            map.insert(
                crate::session::HEADER_SET_SESSION,
                HeaderValue::from_static("a=1"),
            );
            session.lock().unwrap().apply(&map, Some("SET SESSION"));
        }
        RequestBuilder::new(Arc::new(config), session, origin, Vec::new())
    }

    #[test]
    fn test_statement_request_shape() {
        let b = builder(
            ClientConfig::default()
                .with_user("alice")
                .with_catalog("hive")
                .with_schema("default")
                .with_timezone("UTC")
                .with_parametric_datetime(),
            Vec::new(),
        );
        let req = b.statement("SELECT 1").unwrap();

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url.as_str(), "http://localhost:8080/v1/statement");
        assert_eq!(req.body.as_deref(), Some("SELECT 1"));
        assert_eq!(req.expect_status, StatusCode::OK);
        assert_eq!(req.headers["x-presto-source"], SOURCE);
        assert_eq!(req.headers["x-presto-user"], "alice");
        assert_eq!(req.headers["x-presto-catalog"], "hive");
        assert_eq!(req.headers["x-presto-schema"], "default");
        assert_eq!(req.headers["x-presto-time-zone"], "UTC");
        assert_eq!(
            req.headers["x-presto-client-capabilities"],
            "PARAMETRIC_DATETIME"
        );
        assert_eq!(req.headers[USER_AGENT], USER_AGENT_VALUE);
    }

    #[test]
    fn test_session_header_on_post_only() {
        let b = builder_with_session(ClientConfig::default());

        let post = b.statement("SELECT 1").unwrap();
        assert_eq!(post.headers[HEADER_SESSION], "a=1");

        let get = b.continuation("http://localhost:8080/v1/next").unwrap();
        assert!(get.headers.get(HEADER_SESSION).is_none());

        let delete = b.cancel("q1").unwrap();
        assert!(delete.headers.get(HEADER_SESSION).is_none());
    }

    #[test]
    fn test_caller_headers_override_case_insensitively() {
        let b = builder(
            ClientConfig::default().with_header("X-Presto-Source", "override"),
            vec![("ACCEPT".to_string(), "application/xml".to_string())],
        );
        let req = b.statement("SELECT 1").unwrap();
        assert_eq!(req.headers["x-presto-source"], "override");
        assert_eq!(req.headers[ACCEPT], "application/xml");
    }

    #[test]
    fn test_caller_session_header_stripped_from_get() {
        let b = builder(
            ClientConfig::default().with_header("x-presto-session", "smuggled=1"),
            Vec::new(),
        );
        let get = b.continuation("http://localhost:8080/v1/next").unwrap();
        assert!(get.headers.get(HEADER_SESSION).is_none());

        // Still honored on POST, where the header is legal.
        let post = b.statement("SELECT 1").unwrap();
        assert_eq!(post.headers[HEADER_SESSION], "smuggled=1");
    }

    #[test]
    fn test_continuation_pins_scheme() {
        let b = builder(ClientConfig::default(), Vec::new());
        let req = b
            .continuation("https://other-host:8081/v1/statement/q/2?x=1")
            .unwrap();
        assert_eq!(req.url.scheme(), "http");
        assert_eq!(req.url.host_str(), Some("other-host"));
        assert_eq!(req.url.port(), Some(8081));
        assert_eq!(req.url.path(), "/v1/statement/q/2");
        assert_eq!(req.url.query(), Some("x=1"));
    }

    #[test]
    fn test_continuation_rejects_invalid_uri() {
        let b = builder(ClientConfig::default(), Vec::new());
        let err = b.continuation("/relative/only").unwrap_err();
        assert!(err
            .to_string()
            .contains("Presto sent invalid nextUri: /relative/only"));
    }

    #[test]
    fn test_cancel_request_shape() {
        let config = ClientConfig::new("example.net", 9090).with_protocol(Protocol::Https);
        let b = builder(config, Vec::new());
        let req = b.cancel("20260101_1").unwrap();
        assert_eq!(req.method, Method::DELETE);
        assert_eq!(req.url.as_str(), "https://example.net:9090/v1/query/20260101_1");
        assert_eq!(req.expect_status, StatusCode::NO_CONTENT);
    }
}
