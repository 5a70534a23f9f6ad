//! The per-statement protocol state machine.
//!
//! One engine task drives one statement: it POSTs the SQL, follows the
//! `nextUri` chain (sleeping through the poll interval when the coordinator
//! repeats a URI), applies session updates, restarts the whole statement on
//! transient coordinator errors while no rows have been delivered, and hands
//! decoded pages to the stream surface through a bounded channel.
//!
//! Cancellation arrives through a [`CancelState`] shared with the stream.
//! The engine reacts at every suspension point; the one deliberate exception
//! is an in-flight request before the query id is known, which is allowed to
//! complete so the id it reveals can be cancelled with a `DELETE`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ClientConfig, RowFormat};
use crate::error::{Error, Result};
use crate::events::{Emitter, QueryEvent};
use crate::protocol::{Column, QueryResults};
use crate::request::{PreparedRequest, RequestBuilder};
use crate::session::SessionStore;
use crate::transport::{Backoff, Fetched, RetryBudget, Transport};
use crate::value::{build_rows, Page};

/// Cancellation channel between a stream surface and its engine task.
pub(crate) struct CancelState {
    pub(crate) token: CancellationToken,
    pub(crate) reason: Mutex<Option<Error>>,
}

impl CancelState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        })
    }
}

/// Per-attempt statement state.
///
/// `query_id`, `columns` and `previous_path` are monotonic within one
/// attempt; a query-level restart replaces the whole handle. `received` is
/// the duplicate-suppression guard: restarts only happen while it is false,
/// so a restart can never re-deliver rows.
#[derive(Default)]
struct QueryHandle {
    query_id: Option<String>,
    columns: Option<Vec<Column>>,
    previous_path: Option<String>,
    info_emitted: bool,
    last_state: Option<String>,
    upstream_finished: bool,
    received: bool,
    errored: bool,
}

enum Attempt {
    Complete,
    Cancelled,
    Fail(Error),
    Restart,
}

enum Dispatch {
    Ok(Fetched<QueryResults>),
    Cancelled,
    Fail(Error),
}

#[derive(Debug)]
enum Next {
    Continue { request: PreparedRequest, poll: bool },
    Finished,
    PrestoError(Error),
}

#[derive(Debug)]
struct Step {
    page: Option<Page>,
    next: Next,
}

pub(crate) struct QueryEngine {
    transport: Transport,
    requests: RequestBuilder,
    session: Arc<Mutex<SessionStore>>,
    config: Arc<ClientConfig>,
    emitter: Emitter,
    tx: mpsc::Sender<Result<Page>>,
    cancel: Arc<CancelState>,
    sql: String,
    row_format: RowFormat,
    budget: RetryBudget,
    query_backoff: Backoff,
    handle: QueryHandle,
    cancel_seen: bool,
}

impl QueryEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Transport,
        requests: RequestBuilder,
        session: Arc<Mutex<SessionStore>>,
        config: Arc<ClientConfig>,
        emitter: Emitter,
        tx: mpsc::Sender<Result<Page>>,
        cancel: Arc<CancelState>,
        sql: String,
        row_format: RowFormat,
    ) -> Self {
        let budget = RetryBudget::new(config.max_retries);
        Self {
            transport,
            requests,
            session,
            config,
            emitter,
            tx,
            cancel,
            sql,
            row_format,
            budget,
            query_backoff: Backoff::query(),
            handle: QueryHandle::default(),
            cancel_seen: false,
        }
    }

    /// Drive the statement to one of its three ends: completion, error, or
    /// cancellation.
    pub(crate) async fn run(mut self) {
        loop {
            match self.run_attempt().await {
                Attempt::Complete | Attempt::Cancelled => return,
                Attempt::Fail(err) => {
                    self.handle.errored = true;
                    self.fail(err).await;
                    return;
                }
                Attempt::Restart => {
                    let delay = self.query_backoff.next_delay();
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        retries_left = self.budget.remaining(),
                        "restarting statement after transient coordinator error"
                    );
                    self.emitter.emit(QueryEvent::Retry { delay });
                    if !self.sleep(delay).await {
                        self.finish_cancelled().await;
                        return;
                    }
                    self.handle = QueryHandle::default();
                }
            }
        }
    }

    async fn run_attempt(&mut self) -> Attempt {
        let mut request = match self.requests.statement(&self.sql) {
            Ok(request) => request,
            Err(e) => return Attempt::Fail(e),
        };
        loop {
            // Destroyed before anything went out: nothing to cancel upstream
            // unless a previous response already revealed the query id.
            if self.cancel.token.is_cancelled() && !self.cancel_seen {
                self.cancel_seen = true;
                self.finish_cancelled().await;
                return Attempt::Cancelled;
            }

            let fetched = match self.dispatch(&request).await {
                Dispatch::Ok(fetched) => fetched,
                Dispatch::Cancelled => return Attempt::Cancelled,
                Dispatch::Fail(e) => return Attempt::Fail(e),
            };
            let step = match self.process(fetched) {
                Ok(step) => step,
                Err(e) => return Attempt::Fail(e),
            };
            if let Some(page) = step.page {
                if !self.deliver(page).await {
                    return Attempt::Cancelled;
                }
            }
            match step.next {
                Next::Continue { request: next, poll } => {
                    if poll && !self.sleep(self.config.poll_interval).await {
                        self.finish_cancelled().await;
                        return Attempt::Cancelled;
                    }
                    request = next;
                }
                Next::Finished => return Attempt::Complete,
                Next::PrestoError(err) => {
                    if self.should_restart(&err) && self.budget.try_consume() {
                        return Attempt::Restart;
                    }
                    return Attempt::Fail(err);
                }
            }
        }
    }

    /// Execute one request under the cancellation rules.
    ///
    /// When destroy arrives mid-request and the query id is already known,
    /// the request is aborted and the id is cancelled. When the id is not
    /// known yet, the response is awaited so the id it may carry can be
    /// cancelled; this is the in-flight handoff of the protocol.
    async fn dispatch(&mut self, request: &PreparedRequest) -> Dispatch {
        let result = {
            let fut = self
                .transport
                .fetch::<QueryResults>(request, &mut self.budget, &self.emitter);
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.token.cancelled(), if !self.cancel_seen => {
                        self.cancel_seen = true;
                        if self.handle.query_id.is_some() {
                            break None;
                        }
                    }
                    result = &mut fut => break Some(result),
                }
            }
        };
        match result {
            None => {
                self.finish_cancelled().await;
                Dispatch::Cancelled
            }
            Some(result) => {
                if self.cancel_seen {
                    if let Ok(fetched) = &result {
                        if self.handle.query_id.is_none() {
                            self.handle.query_id = fetched.value.id.clone();
                        }
                    }
                    self.finish_cancelled().await;
                    return Dispatch::Cancelled;
                }
                match result {
                    Ok(fetched) => Dispatch::Ok(fetched),
                    Err(e) => Dispatch::Fail(e),
                }
            }
        }
    }

    /// Advance the handle with one frame and decide the next move.
    fn process(&mut self, fetched: Fetched<QueryResults>) -> Result<Step> {
        let Fetched {
            value: frame,
            raw_len,
            headers,
        } = fetched;

        if self.handle.query_id.is_none() {
            if let Some(id) = &frame.id {
                debug!(query_id = %id, "query accepted");
                self.handle.query_id = Some(id.clone());
                self.emitter.emit(QueryEvent::Id(id.clone()));
            }
        }
        if self.handle.columns.is_none() {
            if let Some(columns) = &frame.columns {
                self.emitter.emit(QueryEvent::Columns(columns.clone()));
                self.handle.columns = Some(columns.clone());
            }
        }
        if !self.handle.info_emitted {
            if let Some(info) = &frame.info_uri {
                self.handle.info_emitted = true;
                self.emitter.emit(QueryEvent::Info(info.clone()));
            }
        }
        if let Some(stats) = &frame.stats {
            self.emitter.emit(QueryEvent::Stats(stats.clone()));
            if let Some(state) = &stats.state {
                if self.handle.last_state.as_deref() != Some(state.as_str()) {
                    debug!(state = %state, "query state changed");
                    self.handle.last_state = Some(state.clone());
                    self.emitter.emit(QueryEvent::StateChange(state.clone()));
                }
            }
        }
        if let Some(error) = frame.error {
            return Ok(Step {
                page: None,
                next: Next::PrestoError(error.into_error()),
            });
        }

        let mut page = None;
        if let Some(data) = frame.data {
            if !data.is_empty() {
                let columns = self
                    .handle
                    .columns
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("Presto sent data before columns".into()))?;
                self.emitter.emit(QueryEvent::RawPageSize(raw_len));
                self.handle.received = true;
                page = Some(build_rows(columns, data, self.row_format)?);
            }
        }

        self.session
            .lock()
            .expect("session lock")
            .apply(&headers, frame.update_type.as_deref());

        let next = match frame.next_uri {
            Some(raw) => {
                let request = self.requests.continuation(&raw)?;
                let path = path_and_query(&request.url);
                let poll = self.handle.previous_path.as_deref() == Some(path.as_str());
                self.handle.previous_path = Some(path);
                Next::Continue { request, poll }
            }
            None => {
                self.handle.upstream_finished = true;
                Next::Finished
            }
        };
        Ok(Step { page, next })
    }

    fn should_restart(&self, err: &Error) -> bool {
        if self.handle.received {
            return false;
        }
        match err {
            Error::Presto { code, .. } => self.config.retryable_error_names.contains(code),
            _ => false,
        }
    }

    /// Push a page downstream, waiting through back-pressure. Returns false
    /// if the statement was cancelled while waiting.
    async fn deliver(&mut self, page: Page) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.token.cancelled(), if !self.cancel_seen => {
                self.cancel_seen = true;
                false
            }
            sent = self.tx.send(Ok(page)) => sent.is_ok(),
        };
        if sent {
            return true;
        }
        // Either an explicit destroy or the receiver went away.
        self.cancel_seen = true;
        self.finish_cancelled().await;
        false
    }

    /// Cancellable sleep. Returns false when destroy interrupted it.
    async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.token.cancelled(), if !self.cancel_seen => {
                self.cancel_seen = true;
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// The cancellation protocol: never after the upstream finished or
    /// errored; `DELETE /v1/query/{id}` when an id is known; a final
    /// aggregate error when the caller supplied a reason or the DELETE
    /// failed.
    async fn finish_cancelled(&mut self) {
        if self.handle.upstream_finished || self.handle.errored {
            debug!("destroyed after statement end; closing without cancellation");
            return;
        }
        let reason = self.cancel.reason.lock().expect("reason lock").take();
        let mut delete_err = None;
        if let Some(id) = self.handle.query_id.clone() {
            self.emitter.emit(QueryEvent::Cancel);
            debug!(query_id = %id, "cancelling statement");
            match self.requests.cancel(&id) {
                Ok(request) => {
                    if let Err(e) = self
                        .transport
                        .fire(&request, &mut self.budget, &self.emitter)
                        .await
                    {
                        warn!(query_id = %id, error = %e, "cancellation DELETE failed");
                        delete_err = Some(Box::new(e));
                    }
                }
                Err(e) => delete_err = Some(Box::new(e)),
            }
        }
        if reason.is_some() || delete_err.is_some() {
            let _ = self.tx.try_send(Err(Error::Cancelled {
                reason: reason.map(Box::new),
                source: delete_err,
            }));
        }
    }

    async fn fail(&mut self, err: Error) {
        tokio::select! {
            biased;
            // Receiver gone or destroy racing the failure: the error has no
            // recipient anymore.
            _ = self.cancel.token.cancelled(), if !self.cancel_seen => {}
            _ = self.tx.send(Err(err)) => {}
        }
    }
}

fn path_and_query(url: &reqwest::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
