//! Pull-driven delivery surfaces for query results.
//!
//! The engine task pushes pages into a bounded channel; these types are the
//! receiving end, implementing [`futures::Stream`]. Not polling the stream
//! is back-pressure: once the channel is full the engine stops advancing the
//! protocol until the consumer catches up.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::engine::CancelState;
use crate::error::{Error, Result};
use crate::value::{Page, Row};

/// A back-pressured stream of [`Page`]s.
///
/// Produced by [`Client::page_stream`](crate::Client::page_stream). Pages
/// arrive in protocol order; when a page size was configured, oversized
/// pages are split into consecutive chunks with the remainder last.
pub struct PageStream {
    rx: mpsc::Receiver<Result<Page>>,
    cancel: Arc<CancelState>,
    page_size: usize,
    pending: VecDeque<Page>,
    done: bool,
}

impl PageStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<Page>>,
        cancel: Arc<CancelState>,
        page_size: usize,
    ) -> Self {
        Self {
            rx,
            cancel,
            page_size,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Cancel the statement.
    ///
    /// Idempotent. If the statement already finished or failed this is a
    /// no-op; otherwise the engine runs the cancellation protocol
    /// (`DELETE /v1/query/{id}` once an id is known) in the background and
    /// the stream ends. Rows not yet consumed are discarded.
    pub fn cancel(&mut self) {
        self.destroy(None);
    }

    /// Cancel the statement with a caller-supplied reason.
    ///
    /// The reason is surfaced as the stream's terminal
    /// [`Error::Cancelled`], together with the DELETE failure if one occurs.
    pub fn cancel_with(&mut self, reason: Error) {
        self.destroy(Some(reason));
    }

    fn destroy(&mut self, reason: Option<Error>) {
        if self.done || self.cancel.token.is_cancelled() {
            return;
        }
        self.pending.clear();
        if let Some(reason) = reason {
            *self.cancel.reason.lock().expect("reason lock") = Some(reason);
        }
        self.cancel.token.cancel();
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.token.is_cancelled()
    }

    fn queue(&mut self, page: Page) {
        if self.page_size == 0 || page.len() <= self.page_size {
            self.pending.push_back(page);
            return;
        }
        let mut rest = page;
        while rest.len() > self.page_size {
            let tail = rest.split_off(self.page_size);
            self.pending.push_back(rest);
            rest = tail;
        }
        if !rest.is_empty() {
            self.pending.push_back(rest);
        }
    }
}

impl Stream for PageStream {
    type Item = Result<Page>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if let Some(page) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(page)));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(page))) => {
                    // Pages that were already in flight when the statement
                    // was destroyed are dropped, not delivered.
                    if this.cancel.token.is_cancelled() {
                        continue;
                    }
                    this.queue(page);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for PageStream {
    fn drop(&mut self) {
        // Dropping a live stream cancels the statement in the background.
        if !self.done {
            self.cancel.token.cancel();
        }
    }
}

/// A back-pressured stream of [`Row`]s.
///
/// Produced by [`Client::query_stream`](crate::Client::query_stream); the
/// row-by-row view of the same delivery pipeline.
pub struct RowStream {
    pages: PageStream,
    current: std::vec::IntoIter<Row>,
}

impl RowStream {
    pub(crate) fn new(pages: PageStream) -> Self {
        Self {
            pages,
            current: Vec::new().into_iter(),
        }
    }

    /// Cancel the statement. See [`PageStream::cancel`].
    pub fn cancel(&mut self) {
        self.current = Vec::new().into_iter();
        self.pages.cancel();
    }

    /// Cancel the statement with a reason. See [`PageStream::cancel_with`].
    pub fn cancel_with(&mut self, reason: Error) {
        self.current = Vec::new().into_iter();
        self.pages.cancel_with(reason);
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(row) = this.current.next() {
                if this.pages.cancelled() {
                    this.current = Vec::new().into_iter();
                    continue;
                }
                return Poll::Ready(Some(Ok(row)));
            }
            match Pin::new(&mut this.pages).poll_next(cx) {
                Poll::Ready(Some(Ok(page))) => this.current = page.into_iter(),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use futures::StreamExt;
    use serde_json::json;

    fn row(n: i64) -> Row {
        Row::Array(vec![Value::Json(json!(n))])
    }

    fn page(range: std::ops::Range<i64>) -> Page {
        range.map(row).collect()
    }

    #[tokio::test]
    async fn test_page_stream_passes_pages_through() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = PageStream::new(rx, CancelState::new(), 0);

        tx.send(Ok(page(0..3))).await.unwrap();
        tx.send(Ok(page(3..5))).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().unwrap().len(), 3);
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_page_stream_splits_oversized_pages() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = PageStream::new(rx, CancelState::new(), 2);

        tx.send(Ok(page(0..5))).await.unwrap();
        drop(tx);

        let sizes: Vec<usize> = vec![
            stream.next().await.unwrap().unwrap().len(),
            stream.next().await.unwrap().unwrap().len(),
            stream.next().await.unwrap().unwrap().len(),
        ];
        assert_eq!(sizes, vec![2, 2, 1]);

        // Order is preserved across the split boundaries.
        let (tx, rx) = mpsc::channel(4);
        let mut stream = PageStream::new(rx, CancelState::new(), 2);
        tx.send(Ok(page(0..5))).await.unwrap();
        drop(tx);
        let mut all = Vec::new();
        while let Some(chunk) = stream.next().await {
            all.extend(chunk.unwrap());
        }
        assert_eq!(all, page(0..5));
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = PageStream::new(rx, CancelState::new(), 0);

        tx.send(Err(Error::EmptySql)).await.unwrap();
        tx.send(Ok(page(0..1))).await.unwrap();
        drop(tx);

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_pages() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancelState::new();
        let mut stream = PageStream::new(rx, cancel.clone(), 0);

        tx.send(Ok(page(0..3))).await.unwrap();
        drop(tx);

        stream.cancel();
        assert!(cancel.token.is_cancelled());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_tx, rx) = mpsc::channel::<Result<Page>>(4);
        let cancel = CancelState::new();
        let mut stream = PageStream::new(rx, cancel.clone(), 0);
        stream.cancel();
        stream.cancel_with(Error::EmptySql);
        // The second call must not install a reason.
        assert!(cancel.reason.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_signals_cancellation() {
        let (_tx, rx) = mpsc::channel::<Result<Page>>(4);
        let cancel = CancelState::new();
        drop(PageStream::new(rx, cancel.clone(), 0));
        assert!(cancel.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_row_stream_flattens_pages() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = RowStream::new(PageStream::new(rx, CancelState::new(), 0));

        tx.send(Ok(page(0..2))).await.unwrap();
        tx.send(Ok(page(2..3))).await.unwrap();
        drop(tx);

        let mut rows = Vec::new();
        while let Some(r) = stream.next().await {
            rows.push(r.unwrap());
        }
        assert_eq!(rows, page(0..3));
    }
}
