//! Row/Page Stream (§4.6)
//!
//! The pull-driven, back-pressured delivery surface in front of a running
//! [`Engine`](crate::engine::Engine). [`QueryStream`] yields individual rows
//! (`pageSize` ignored); [`PageStream`] yields whole pages, chunked to
//! `pageSize` when set. Both share the cancellation plumbing in
//! [`RawStream`]/[`Canceller`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::{Command, Event};
use crate::error::{PrestoClientError, Result};
use crate::protocol::{Column, Page, Row, StatementStats};

/// A lightweight, cloneable handle that can cancel a running statement from
/// a task other than the one pulling the stream (§11 supplement).
#[derive(Clone)]
pub struct Canceller {
    cmd_tx: mpsc::UnboundedSender<Command>,
    finished: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl Canceller {
    /// Requests cancellation, optionally carrying a caller-supplied cause.
    ///
    /// Idempotent: only the first call has any effect. A no-op if the
    /// statement has already finished upstream.
    pub fn cancel(&self, cause: Option<PrestoClientError>) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.send(Command::Destroy(cause));
    }
}

struct RawStream {
    event_rx: mpsc::Receiver<Event>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    finished: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl RawStream {
    fn new(event_rx: mpsc::Receiver<Event>, cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            event_rx,
            cmd_tx,
            finished: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn canceller(&self) -> Canceller {
        Canceller {
            cmd_tx: self.cmd_tx.clone(),
            finished: Arc::clone(&self.finished),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    fn cancel(&self, cause: Option<PrestoClientError>) {
        self.canceller().cancel(cause);
    }
}

/// Metadata accumulated from observable engine events, readable alongside
/// row/page pulls.
#[derive(Debug, Clone, Default)]
pub struct StreamMeta {
    /// The coordinator-assigned query id, once known.
    pub id: Option<String>,
    /// Column metadata, once known.
    pub columns: Option<Vec<Column>>,
    /// The most recently observed execution stats.
    pub stats: Option<StatementStats>,
    /// The informational UI URI, if the coordinator sent one.
    pub info_uri: Option<String>,
}

impl StreamMeta {
    fn record(&mut self, event: &Event) {
        match event {
            Event::Id(id) => self.id = Some(id.clone()),
            Event::Info(info) => self.info_uri = Some(info.clone()),
            Event::Columns(columns) => self.columns = Some(columns.clone()),
            Event::Stats(stats) => self.stats = Some(stats.clone()),
            _ => {}
        }
    }
}

/// A pull-driven, back-pressured sequence of individual rows.
///
/// `pageSize` has no effect on this surface; pages are flattened into their
/// constituent rows in wire order.
pub struct QueryStream {
    raw: RawStream,
    pending: VecDeque<Row>,
    terminated: bool,
    meta: StreamMeta,
}

impl QueryStream {
    pub(crate) fn new(event_rx: mpsc::Receiver<Event>, cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            raw: RawStream::new(event_rx, cmd_tx),
            pending: VecDeque::new(),
            terminated: false,
            meta: StreamMeta::default(),
        }
    }

    /// Pulls the next row, awaiting the engine if the local buffer is empty.
    /// Returns `None` once the statement has finished and every buffered row
    /// has been delivered.
    pub async fn next(&mut self) -> Option<Result<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.terminated {
                return None;
            }
            match self.raw.event_rx.recv().await {
                Some(Event::Page(page)) => self.pending.extend(page),
                Some(Event::Error(e)) => return Some(Err(e)),
                Some(Event::Close) => {
                    self.terminated = true;
                    self.raw.finished.store(true, Ordering::Release);
                }
                Some(other) => self.meta.record(&other),
                None => self.terminated = true,
            }
        }
    }

    /// Metadata observed so far (id, columns, stats, info uri).
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Requests cancellation of the underlying statement. Idempotent and a
    /// no-op once the statement has finished.
    pub fn cancel(&self, cause: Option<PrestoClientError>) {
        self.raw.cancel(cause);
    }

    /// Returns a cloneable handle that can cancel this statement from
    /// another task.
    pub fn canceller(&self) -> Canceller {
        self.raw.canceller()
    }
}

impl Drop for QueryStream {
    /// Dropping the stream without an explicit `cancel()` still cancels the
    /// underlying statement (§11.2 of `SPEC_FULL.md`): best-effort, silent,
    /// and a no-op once the statement has already finished.
    fn drop(&mut self) {
        self.raw.cancel(None);
    }
}

/// A pull-driven, back-pressured sequence of pages, each chunked to at most
/// `pageSize` rows (`pageSize == 0` disables chunking).
pub struct PageStream {
    raw: RawStream,
    page_size: usize,
    pending: VecDeque<Page>,
    terminated: bool,
    meta: StreamMeta,
}

impl PageStream {
    pub(crate) fn new(
        event_rx: mpsc::Receiver<Event>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        page_size: usize,
    ) -> Self {
        Self {
            raw: RawStream::new(event_rx, cmd_tx),
            page_size,
            pending: VecDeque::new(),
            terminated: false,
            meta: StreamMeta::default(),
        }
    }

    /// Pulls the next (possibly chunked) page.
    pub async fn next(&mut self) -> Option<Result<Page>> {
        loop {
            if let Some(page) = self.pending.pop_front() {
                return Some(Ok(page));
            }
            if self.terminated {
                return None;
            }
            match self.raw.event_rx.recv().await {
                Some(Event::Page(page)) => self.buffer_page(page),
                Some(Event::Error(e)) => return Some(Err(e)),
                Some(Event::Close) => {
                    self.terminated = true;
                    self.raw.finished.store(true, Ordering::Release);
                }
                Some(other) => self.meta.record(&other),
                None => self.terminated = true,
            }
        }
    }

    fn buffer_page(&mut self, page: Page) {
        if self.page_size > 0 && page.len() > self.page_size {
            for chunk in page.chunks(self.page_size) {
                self.pending.push_back(chunk.to_vec());
            }
        } else {
            self.pending.push_back(page);
        }
    }

    /// Metadata observed so far (id, columns, stats, info uri).
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Requests cancellation of the underlying statement. Idempotent and a
    /// no-op once the statement has finished.
    pub fn cancel(&self, cause: Option<PrestoClientError>) {
        self.raw.cancel(cause);
    }

    /// Returns a cloneable handle that can cancel this statement from
    /// another task.
    pub fn canceller(&self) -> Canceller {
        self.raw.canceller()
    }
}

impl Drop for PageStream {
    /// See [`QueryStream`]'s `Drop` impl: dropping cancels the statement.
    fn drop(&mut self) {
        self.raw.cancel(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Row;
    use serde_json::json;

    fn harness() -> (mpsc::Sender<Event>, QueryStream) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        (event_tx, QueryStream::new(event_rx, cmd_tx))
    }

    fn page_harness(page_size: usize) -> (mpsc::Sender<Event>, PageStream) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        (event_tx, PageStream::new(event_rx, cmd_tx, page_size))
    }

    #[tokio::test]
    async fn query_stream_flattens_pages_into_rows() {
        let (tx, mut stream) = harness();
        tx.send(Event::Page(vec![
            Row::Object(serde_json::Map::from_iter([("a".to_string(), json!(0))])),
            Row::Object(serde_json::Map::from_iter([("a".to_string(), json!(1))])),
        ]))
        .await
        .unwrap();
        tx.send(Event::Close).await.unwrap();
        drop(tx);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            Row::Object(serde_json::Map::from_iter([("a".to_string(), json!(0))]))
        );
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(
            second,
            Row::Object(serde_json::Map::from_iter([("a".to_string(), json!(1))]))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn query_stream_surfaces_error_then_ends() {
        let (tx, mut stream) = harness();
        tx.send(Event::Error(PrestoClientError::EmptyStatement)).await.unwrap();
        tx.send(Event::Close).await.unwrap();
        drop(tx);

        let err = stream.next().await.unwrap();
        assert!(err.is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn query_stream_records_metadata() {
        let (tx, mut stream) = harness();
        tx.send(Event::Id("q1".to_string())).await.unwrap();
        tx.send(Event::Columns(vec![])).await.unwrap();
        tx.send(Event::Close).await.unwrap();
        drop(tx);

        assert!(stream.next().await.is_none());
        assert_eq!(stream.meta().id.as_deref(), Some("q1"));
        assert!(stream.meta().columns.is_some());
    }

    #[tokio::test]
    async fn page_stream_chunks_by_page_size() {
        let (tx, mut stream) = page_harness(2);
        let page: Page = vec![
            Row::Array(vec![json!(0)]),
            Row::Array(vec![json!(1)]),
            Row::Array(vec![json!(2)]),
        ];
        tx.send(Event::Page(page)).await.unwrap();
        tx.send(Event::Close).await.unwrap();
        drop(tx);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn page_stream_zero_page_size_disables_chunking() {
        let (tx, mut stream) = page_harness(0);
        let page: Page = vec![Row::Array(vec![json!(0)]), Row::Array(vec![json!(1)])];
        tx.send(Event::Page(page.clone())).await.unwrap();
        tx.send(Event::Close).await.unwrap();
        drop(tx);

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, page);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_sends_at_most_once() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let stream = QueryStream::new(event_rx, cmd_tx);
        drop(event_tx);

        stream.cancel(None);
        stream.cancel(None);
        stream.cancel(None);

        let received = cmd_rx.recv().await;
        assert!(matches!(received, Some(Command::Destroy(None))));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_after_finished() {
        let (tx, stream) = harness();
        tx.send(Event::Close).await.unwrap();

        let canceller = stream.canceller();
        // Drain Close to flip the `finished` flag, mirroring normal consumption.
        let mut stream = stream;
        assert!(stream.next().await.is_none());

        canceller.cancel(None);
        // No command channel assertions needed: `finished` guards the send
        // entirely, so there is nothing to observe on the (dropped) receiver.
    }
}
