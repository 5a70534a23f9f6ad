//! Protocol events observable while a statement runs.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};

use crate::protocol::{Column, StatementStats};

/// One observable protocol event.
///
/// Terminal outcomes (end of stream, error) are delivered through the stream
/// itself, not as events. Unless noted, each event fires at most once per
/// statement attempt; a query-level restart starts a fresh attempt, so
/// `Id`, `Info` and `Columns` may repeat across attempts.
#[derive(Clone, Debug)]
pub enum QueryEvent {
    /// An HTTP request is about to go out. Fires for every outbound request,
    /// including transport retries, redirect re-dispatches and cancellation.
    Request {
        /// HTTP method.
        method: Method,
        /// Full request URL.
        url: Url,
    },
    /// The coordinator assigned a query id.
    Id(String),
    /// Link to the coordinator's query UI.
    Info(String),
    /// The result schema is known.
    Columns(Vec<Column>),
    /// A statistics snapshot arrived. Fires once per frame carrying stats.
    Stats(StatementStats),
    /// The coordinator-side query state changed.
    StateChange(String),
    /// A frame carried rows; the payload is the decoded body size in bytes.
    RawPageSize(usize),
    /// A retry (transport- or query-level) is about to wait and re-dispatch.
    Retry {
        /// Back-off delay before the retry.
        delay: Duration,
    },
    /// The statement is being cancelled; a `DELETE /v1/query/{id}` follows.
    Cancel,
}

/// Receiver for [`QueryEvent`]s, registered through
/// [`QueryOptions::with_observer`](crate::QueryOptions::with_observer).
///
/// Implemented for plain closures:
///
/// ```ignore
/// let options = QueryOptions::new()
///     .with_observer(Arc::new(|event: QueryEvent| println!("{event:?}")));
/// ```
pub trait QueryObserver: Send + Sync {
    /// Called synchronously from the engine task for every event.
    fn on_event(&self, event: QueryEvent);
}

impl<F> QueryObserver for F
where
    F: Fn(QueryEvent) + Send + Sync,
{
    fn on_event(&self, event: QueryEvent) {
        self(event)
    }
}

/// Shared handle that forwards events to the registered observer, if any.
#[derive(Clone, Default)]
pub(crate) struct Emitter(Option<Arc<dyn QueryObserver>>);

impl Emitter {
    pub(crate) fn new(observer: Option<Arc<dyn QueryObserver>>) -> Self {
        Self(observer)
    }

    pub(crate) fn emit(&self, event: QueryEvent) {
        if let Some(observer) = &self.0 {
            observer.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter = Emitter::new(Some(Arc::new(move |event: QueryEvent| {
            sink.lock().unwrap().push(format!("{event:?}"));
        })));

        emitter.emit(QueryEvent::Id("q1".to_string()));
        emitter.emit(QueryEvent::Cancel);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("q1"));
    }

    #[test]
    fn test_emitter_without_observer_is_noop() {
        Emitter::new(None).emit(QueryEvent::Cancel);
    }
}
