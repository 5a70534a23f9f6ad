//! HTTP transport: executes one prepared request and classifies the outcome.
//!
//! The transport owns everything that happens inside a single protocol step:
//! 307 redirects (same scheme only), retry with exponential back-off for 503
//! and connection-level failures, status and content-type verification, and
//! JSON decoding. Anything that escapes this module is fatal to the
//! statement unless the engine's query-level retry policy matches it.

use std::io;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::{Emitter, QueryEvent};
use crate::request::PreparedRequest;

/// Exponential back-off schedule: `floor * 2^attempt`, clamped to `ceiling`.
#[derive(Debug)]
pub(crate) struct Backoff {
    attempt: u32,
    floor: Duration,
    ceiling: Duration,
}

impl Backoff {
    /// Transport-level schedule: 1 s floor, 10 s ceiling.
    pub(crate) fn transport() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Query-restart schedule: 1 s floor, 5 min ceiling.
    pub(crate) fn query() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }

    fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            attempt: 0,
            floor,
            ceiling,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(30);
        self.attempt += 1;
        self.floor
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.ceiling)
    }
}

/// Retry budget shared between transport retries and query-level restarts.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub(crate) fn new(max_retries: u32) -> Self {
        Self {
            remaining: max_retries,
        }
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }

    pub(crate) fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// A decoded successful response.
pub(crate) struct Fetched<T> {
    pub value: T,
    /// Decoded body size in bytes.
    pub raw_len: usize,
    /// Response headers, for session updates.
    pub headers: HeaderMap,
}

enum OnePass {
    Done(Vec<u8>, HeaderMap),
    Redirect(Url),
}

/// Executes prepared requests over a shared `reqwest::Client`.
///
/// The client is built with redirect following disabled and with the
/// configured socket timeout as its read timeout; keep-alive pooling and
/// gzip/deflate decompression come from reqwest itself.
#[derive(Clone)]
pub(crate) struct Transport {
    http: reqwest::Client,
}

impl Transport {
    pub(crate) fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Execute a request whose success is a JSON body of type `T`.
    pub(crate) async fn fetch<T: DeserializeOwned>(
        &self,
        req: &PreparedRequest,
        budget: &mut RetryBudget,
        emitter: &Emitter,
    ) -> Result<Fetched<T>> {
        let (bytes, headers) = self.dispatch(req, budget, emitter).await?;
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if media_type(content_type) != "application/json" {
            return Err(Error::UnexpectedContentType(content_type.to_string()));
        }
        let value = serde_json::from_slice(&bytes)?;
        Ok(Fetched {
            value,
            raw_len: bytes.len(),
            headers,
        })
    }

    /// Execute a request whose success carries no body (e.g. `DELETE` → 204).
    pub(crate) async fn fire(
        &self,
        req: &PreparedRequest,
        budget: &mut RetryBudget,
        emitter: &Emitter,
    ) -> Result<()> {
        self.dispatch(req, budget, emitter).await?;
        Ok(())
    }

    /// The request loop: redirects re-dispatch immediately, retryable
    /// failures wait through the back-off and consume budget.
    async fn dispatch(
        &self,
        req: &PreparedRequest,
        budget: &mut RetryBudget,
        emitter: &Emitter,
    ) -> Result<(Vec<u8>, HeaderMap)> {
        let mut url = req.url.clone();
        let mut backoff = Backoff::transport();
        loop {
            emitter.emit(QueryEvent::Request {
                method: req.method.clone(),
                url: url.clone(),
            });
            debug!(method = %req.method, url = %url, "dispatching request");

            let err = match self.send_once(req, &url).await {
                Ok(OnePass::Done(bytes, headers)) => return Ok((bytes, headers)),
                Ok(OnePass::Redirect(next)) => {
                    debug!(from = %url, to = %next, "following 307 redirect");
                    url = next;
                    continue;
                }
                Err(e) if is_retryable(&e) => e,
                Err(e) => return Err(e),
            };

            if !budget.try_consume() {
                return Err(err);
            }
            let delay = backoff.next_delay();
            warn!(error = %err, delay_ms = delay.as_millis() as u64, "retrying request");
            emitter.emit(QueryEvent::Retry { delay });
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(&self, req: &PreparedRequest, url: &Url) -> Result<OnePass> {
        let mut builder = self
            .http
            .request(req.method.clone(), url.clone())
            .headers(req.headers.clone());
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        let resp = builder.send().await?;
        let status = resp.status();

        if status == StatusCode::TEMPORARY_REDIRECT {
            return Ok(OnePass::Redirect(redirect_target(
                url,
                resp.headers().get(LOCATION),
            )?));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            // Drain the body so the connection can go back to the pool.
            let _ = resp.bytes().await;
            return Err(Error::HttpStatus {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        if status != req.expect_status {
            if status.is_client_error() || status.is_server_error() {
                let reason = status.canonical_reason().unwrap_or_default().to_string();
                let plain = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ct| media_type(ct) == "text/plain");
                let body = resp.text().await.unwrap_or_default();
                let trimmed = body.trim();
                let message = if plain && !trimmed.is_empty() {
                    trimmed.to_string()
                } else {
                    reason
                };
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(Error::UnexpectedStatus(status.as_u16()));
        }

        let headers = resp.headers().clone();
        let bytes = resp.bytes().await.map_err(|e| {
            if e.is_decode() {
                Error::Protocol(format!("Unable to decode response content: {e}"))
            } else {
                Error::Http(e)
            }
        })?;
        Ok(OnePass::Done(bytes.to_vec(), headers))
    }
}

fn redirect_target(url: &Url, location: Option<&HeaderValue>) -> Result<Url> {
    let raw = location
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Protocol("HTTP 307 redirect is missing a location header".into()))?;
    let next = Url::parse(raw).map_err(|_| {
        Error::Protocol(format!("HTTP 307 redirect location is not a valid URL: {raw}"))
    })?;
    if next.scheme() != url.scheme() {
        return Err(Error::Protocol(
            "HTTP 307 redirect protocol switch is not allowed".into(),
        ));
    }
    Ok(next)
}

fn media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
}

/// Transport-level retry classification: 503, refused/reset connections and
/// socket timeouts. Everything else is fatal here.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::HttpStatus { status: 503, .. } => true,
        Error::Http(e) => {
            if e.is_timeout() || e.is_connect() {
                return true;
            }
            matches!(
                io_error_kind(e),
                Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused)
            )
        }
        _ => false,
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_backoff_progression() {
        let mut backoff = Backoff::transport();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_query_backoff_ceiling() {
        let mut backoff = Backoff::query();
        let last = (0..16).map(|_| backoff.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(300));
    }

    #[test]
    fn test_budget_consumption() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let mut budget = RetryBudget::new(0);
        assert!(!budget.try_consume());
    }

    #[test]
    fn test_503_is_retryable() {
        let err = Error::HttpStatus {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(is_retryable(&err));

        let err = Error::HttpStatus {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_redirect_requires_location() {
        let url = Url::parse("http://localhost:8080/v1/statement").unwrap();
        let err = redirect_target(&url, None).unwrap_err();
        assert!(err.to_string().contains("missing a location header"));
    }

    #[test]
    fn test_redirect_denies_protocol_switch() {
        let url = Url::parse("http://localhost:8080/v1/statement").unwrap();
        let location = HeaderValue::from_static("https://other:8081/v1/statement");
        let err = redirect_target(&url, Some(&location)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP 307 redirect protocol switch is not allowed"
        );
    }

    #[test]
    fn test_redirect_same_scheme_ok() {
        let url = Url::parse("http://localhost:8080/v1/statement").unwrap();
        let location = HeaderValue::from_static("http://other:8081/v1/statement?foo");
        let next = redirect_target(&url, Some(&location)).unwrap();
        assert_eq!(next.as_str(), "http://other:8081/v1/statement?foo");
    }

    #[test]
    fn test_media_type_strips_parameters() {
        assert_eq!(media_type("application/json; charset=utf-8"), "application/json");
        assert_eq!(media_type("text/plain"), "text/plain");
        assert_eq!(media_type(""), "");
    }
}
