//! Query Engine: the per-statement protocol state machine (§4.4, §4.5)
//!
//! Owns the `nextUri` chain, polling, query-level retry on transient Presto
//! errors, cancellation, and row/page construction. Runs as its own async
//! task; the [`stream`](crate::stream) module is the only consumer of its
//! event stream and the only producer of [`Command`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{PrestoClientError, Result};
use crate::protocol::{Column, QueryResults, Page, RowFormat, Statement};
use crate::request;
use crate::session::SessionStore;
use crate::transport::{backoff_delay, PreparedRequest, RetryBudget, Sleeper, Transport};
use crate::value::ColumnDecoder;

const QUERY_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const QUERY_BACKOFF_CEILING: Duration = Duration::from_secs(5 * 60);

/// Presto error codes classified as transient, restarting the statement from
/// scratch when no rows have been delivered yet (§4.4 point 4).
const RETRYABLE_PRESTO_ERRORS: &[&str] = &[
    "SERVER_STARTING_UP",
    "HIVE_METASTORE_ERROR",
    "TOO_MANY_REQUESTS_FAILED",
    "PAGE_TRANSPORT_TIMEOUT",
];

/// Commands the stream surface sends back into the engine.
#[derive(Debug)]
pub enum Command {
    /// Cancellation entry point, with an optional caller-supplied cause.
    Destroy(Option<PrestoClientError>),
}

/// The observable event surface emitted by the engine (§4.6).
#[derive(Debug)]
pub enum Event {
    /// One outbound request was sent.
    Request {
        /// `"POST"`, `"GET"`, or `"DELETE"`.
        method: &'static str,
        /// The fully resolved URL.
        url: String,
    },
    /// The coordinator assigned a query id (may fire more than once across restarts).
    Id(String),
    /// The coordinator's `infoUri`, emitted at most once for the whole statement.
    Info(String),
    /// Column metadata became known (may fire more than once across restarts).
    Columns(Vec<Column>),
    /// Execution stats from the latest frame.
    Stats(crate::protocol::StatementStats),
    /// `stats.state` changed since the last frame.
    StateChange(String),
    /// The unsliced row count of a just-received page, before any downstream chunking.
    RawPageSize(usize),
    /// A retry is about to happen, after the given delay.
    Retry(Duration),
    /// One full page of decoded rows.
    Page(Page),
    /// Cancellation was initiated (emitted at most once, before the `DELETE`).
    Cancel,
    /// Terminal: the stream is finished, successfully or not.
    Close,
    /// Terminal (at most once): the statement ended in error.
    Error(PrestoClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostResponseAction {
    Deliver,
    CancelWithId,
}

/// Coarse state, kept for introspection/tracing; control flow is driven by
/// the explicit loop in [`Engine::run`] rather than by matching on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No request has been sent yet.
    Idle,
    /// Initial `POST` in flight.
    Requesting,
    /// Waiting out `pollInterval` before re-fetching the same `nextUri`.
    Polling,
    /// `GET <nextUri>` in flight.
    Advancing,
    /// Waiting out the query-level back-off before restarting the statement.
    Retrying,
    /// Statement completed successfully.
    Finished,
    /// Statement ended in error.
    Errored,
    /// Cancellation is in progress.
    Cancelling,
    /// Terminal; no further activity.
    Closed,
}

#[derive(Debug, Default)]
struct QueryHandle {
    query_id: Option<String>,
    columns: Option<Vec<Column>>,
    next_uri: Option<url::Url>,
    previous_path: Option<String>,
    upstream_finished: bool,
    received: bool,
    info_emitted: bool,
    last_state: Option<String>,
    host: String,
    port: Option<u16>,
}

impl QueryHandle {
    fn reset(&mut self, config: &ClientConfig) {
        let received = self.received;
        *self = QueryHandle {
            host: config.hostname.clone(),
            port: Some(config.port),
            received,
            ..Default::default()
        };
    }
}

enum StepOutcome {
    Continue,
    RestartStatement,
    Terminated,
}

/// Outcome of [`Engine::emit_checked`]: either the event was delivered, or a
/// racing `Destroy` command won and the statement has already been
/// terminated (cancelled) as a side effect.
enum EmitOutcome {
    Sent,
    Terminated,
}

/// Per-statement engine configuration, supplied once at spawn time.
pub struct EngineParams {
    /// Client configuration (shared, immutable).
    pub config: Arc<ClientConfig>,
    /// Shared transport.
    pub transport: Arc<Transport>,
    /// Shared session store.
    pub session: Arc<Mutex<SessionStore>>,
    /// The statement to execute.
    pub statement: Statement,
    /// Per-request headers supplied by the caller of `query`/`query_pages`.
    pub per_request_headers: Vec<(String, String)>,
    /// Row shape for object-vs-array decoding.
    pub row_format: RowFormat,
    /// Value decoder (defaults to [`crate::value::DefaultDecoder`]).
    pub decoder: Arc<dyn ColumnDecoder>,
    /// Back-off sleeper (defaults to a real tokio sleeper; tests inject a fake).
    pub sleeper: Arc<dyn Sleeper>,
    /// Event channel capacity, i.e. the downstream high-water mark in pages.
    pub high_water_mark: usize,
}

/// A running (or about to run) query engine, plus its command/event handles.
pub struct Engine {
    config: Arc<ClientConfig>,
    transport: Arc<Transport>,
    session: Arc<Mutex<SessionStore>>,
    statement: Statement,
    per_request_headers: Vec<(String, String)>,
    row_format: RowFormat,
    decoder: Arc<dyn ColumnDecoder>,
    sleeper: Arc<dyn Sleeper>,
    retry_budget: Arc<RetryBudget>,
    event_tx: mpsc::Sender<Event>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state: State,
    destroyed: AtomicBool,
    /// Set once `cmd_rx` has observed every `Canceller`/stream handle
    /// dropped without ever destroying; short-circuits [`Engine::emit_checked`]
    /// to a plain send instead of re-racing a channel that can never again
    /// produce a command.
    cmd_channel_closed: bool,
}

impl Engine {
    /// Spawns a new engine task for `params`, returning the event receiver
    /// and command sender that [`stream`](crate::stream) wraps.
    pub fn spawn(params: EngineParams) -> (mpsc::Receiver<Event>, mpsc::UnboundedSender<Command>) {
        let (event_tx, event_rx) = mpsc::channel(params.high_water_mark.max(1));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let retry_budget = Arc::new(RetryBudget::new(params.config.max_retries));

        let engine = Engine {
            config: params.config,
            transport: params.transport,
            session: params.session,
            statement: params.statement,
            per_request_headers: params.per_request_headers,
            row_format: params.row_format,
            decoder: params.decoder,
            sleeper: params.sleeper,
            retry_budget,
            event_tx,
            cmd_rx,
            state: State::Idle,
            destroyed: AtomicBool::new(false),
            cmd_channel_closed: false,
        };

        tokio::spawn(engine.run());
        (event_rx, cmd_tx)
    }

    async fn emit(&self, event: Event) -> std::result::Result<(), ()> {
        self.event_tx.send(event).await.map_err(|_| ())
    }

    /// Delivers `event`, racing a queued `Destroy` command against
    /// downstream back-pressure (§5 suspension point (e): a consumer that
    /// has stopped pulling must still be able to cancel).
    ///
    /// Uses `Sender::reserve` rather than `Sender::send(event)` as the raced
    /// future so `event` is never partially moved into a future that loses
    /// the race -- a permit is acquired first, then `event` is handed to it
    /// synchronously once this call has committed to the "deliver" branch.
    async fn emit_checked(&mut self, event: Event, handle: &QueryHandle) -> EmitOutcome {
        if !self.cmd_channel_closed {
            loop {
                tokio::select! {
                    biased;
                    cmd = self.cmd_rx.recv() => {
                        match cmd {
                            Some(Command::Destroy(cause)) => {
                                self.terminate_with_cancel(handle, cause).await;
                                return EmitOutcome::Terminated;
                            }
                            None => {
                                self.cmd_channel_closed = true;
                                break;
                            }
                        }
                    }
                    permit = self.event_tx.reserve() => {
                        return match permit {
                            Ok(p) => {
                                p.send(event);
                                EmitOutcome::Sent
                            }
                            Err(_) => EmitOutcome::Terminated,
                        };
                    }
                }
            }
        }
        match self.event_tx.send(event).await {
            Ok(()) => EmitOutcome::Sent,
            Err(_) => EmitOutcome::Terminated,
        }
    }

    fn transition(&mut self, state: State) {
        tracing::debug!(?state, "engine state transition");
        self.state = state;
    }

    async fn run(mut self) {
        let mut handle = QueryHandle::default();
        handle.reset(&self.config);
        let mut query_attempt: u32 = 0;

        'statement: loop {
            self.transition(State::Requesting);
            let session_snapshot = {
                let guard = self.session.lock().expect("session lock poisoned");
                guard.clone()
            };
            let request = match request::build_statement_request(
                &self.config,
                &self.statement,
                &session_snapshot,
                &self.per_request_headers,
            ) {
                Ok(r) => r,
                Err(e) => {
                    let _ = self.emit(Event::Error(e)).await;
                    let _ = self.emit(Event::Close).await;
                    return;
                }
            };

            match self.send_and_process(request, &mut handle, &mut query_attempt, "POST").await {
                StepOutcome::Terminated => return,
                StepOutcome::RestartStatement => continue 'statement,
                StepOutcome::Continue => {}
            }

            loop {
                if handle.upstream_finished {
                    self.transition(State::Finished);
                    let _ = self.emit(Event::Close).await;
                    return;
                }

                let next_uri = handle
                    .next_uri
                    .clone()
                    .expect("advancing state always has a pending nextUri");

                let same_uri = handle
                    .previous_path
                    .as_deref()
                    .map(|p| p == next_uri.path())
                    .unwrap_or(false);
                if same_uri {
                    self.transition(State::Polling);
                    if !self.sleep_cancellable(self.config.poll_interval, &handle).await {
                        return;
                    }
                }
                self.transition(State::Advancing);

                let request = match request::build_continuation_request(
                    &self.config,
                    self.config.protocol,
                    &next_uri,
                    &self.per_request_headers,
                ) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = self.emit(Event::Error(e)).await;
                        let _ = self.emit(Event::Close).await;
                        return;
                    }
                };
                handle.previous_path = Some(next_uri.path().to_string());

                match self.send_and_process(request, &mut handle, &mut query_attempt, "GET").await {
                    StepOutcome::Terminated => return,
                    StepOutcome::RestartStatement => continue 'statement,
                    StepOutcome::Continue => {}
                }
            }
        }
    }

    /// Sleeps for `duration`, racing against a destroy command. Returns
    /// `false` if destroyed during the sleep (the caller must return
    /// immediately; termination has already been emitted).
    ///
    /// Once the command channel closes (every `Canceller`/stream handle
    /// dropped without ever destroying), `cmd_rx.recv()` resolves to `None`
    /// on every poll; selecting on it forever would busy-loop instead of
    /// ever reaching the sleep, so a closed channel falls back to a plain
    /// sleep instead of re-entering `select!` on a channel that can never
    /// produce another command.
    async fn sleep_cancellable(&mut self, duration: Duration, handle: &QueryHandle) -> bool {
        tokio::select! {
            biased;
            cmd = self.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Destroy(cause)) => {
                        self.terminate_with_cancel(handle, cause).await;
                        false
                    }
                    None => {
                        self.sleeper.sleep(duration).await;
                        true
                    }
                }
            }
            _ = self.sleeper.sleep(duration) => true,
        }
    }

    /// Dispatches `request`, racing destroy commands against the in-flight
    /// response per §4.6's cancellation priority rules, then processes the
    /// result.
    async fn send_and_process(
        &mut self,
        request: PreparedRequest,
        handle: &mut QueryHandle,
        query_attempt: &mut u32,
        method: &'static str,
    ) -> StepOutcome {
        handle.host = request.host.clone();
        handle.port = request.port;
        let url = format!(
            "{}://{}:{}{}",
            self.config.protocol.as_str(),
            request.host,
            request.port.unwrap_or_else(|| self.config.protocol.default_port()),
            request.path_and_query
        );
        tracing::debug!(method, %url, "dispatching request");
        if let EmitOutcome::Terminated = self.emit_checked(Event::Request { method, url }, handle).await {
            return StepOutcome::Terminated;
        }

        let transport = Arc::clone(&self.transport);
        let budget = Arc::clone(&self.retry_budget);
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<Duration>();

        let mut task = tokio::spawn(async move {
            let on_retry = move |delay: Duration| {
                let _ = retry_tx.send(delay);
            };
            transport.execute(request, &budget, &on_retry).await
        });

        let mut post_response_action = PostResponseAction::Deliver;
        let mut destroy_cause: Option<PrestoClientError> = None;
        // Once every `Canceller`/stream handle is dropped without destroying,
        // `cmd_rx.recv()` resolves to `None` on every poll; continuing to
        // select on it would busy-loop forever instead of ever awaiting the
        // in-flight request, so a closed channel falls out of the select set.
        let mut inflight_cmd_channel_closed = false;

        let joined = loop {
            if inflight_cmd_channel_closed {
                break (&mut task).await;
            }
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Destroy(cause)) => {
                            if handle.query_id.is_some() {
                                task.abort();
                                self.terminate_with_cancel(handle, cause).await;
                                return StepOutcome::Terminated;
                            }
                            post_response_action = PostResponseAction::CancelWithId;
                            destroy_cause = cause;
                        }
                        None => {
                            inflight_cmd_channel_closed = true;
                        }
                    }
                }
                joined = &mut task => break joined,
            }
        };

        while let Ok(delay) = retry_rx.try_recv() {
            if let EmitOutcome::Terminated = self.emit_checked(Event::Retry(delay), handle).await {
                return StepOutcome::Terminated;
            }
        }

        let result = match joined {
            Ok(r) => r,
            Err(_join_error) => {
                let err = PrestoClientError::Protocol("engine task ended unexpectedly".to_string());
                return match post_response_action {
                    PostResponseAction::CancelWithId => {
                        self.terminate_with_cancel(handle, destroy_cause).await;
                        StepOutcome::Terminated
                    }
                    PostResponseAction::Deliver => {
                        let _ = self.emit(Event::Error(err)).await;
                        let _ = self.emit(Event::Close).await;
                        StepOutcome::Terminated
                    }
                };
            }
        };

        match post_response_action {
            PostResponseAction::CancelWithId => {
                if let Ok(resp) = &result {
                    handle.host = resp.served_host.clone();
                    handle.port = resp.served_port;
                    if let Some(id) = resp
                        .json
                        .as_ref()
                        .and_then(|j| j.get("id"))
                        .and_then(Value::as_str)
                    {
                        handle.query_id = Some(id.to_string());
                    }
                }
                self.terminate_with_cancel(handle, destroy_cause).await;
                StepOutcome::Terminated
            }
            PostResponseAction::Deliver => match result {
                Ok(resp) => self.process_response(resp, handle, query_attempt).await,
                Err(e) => {
                    let _ = self.emit(Event::Error(e)).await;
                    let _ = self.emit(Event::Close).await;
                    StepOutcome::Terminated
                }
            },
        }
    }

    async fn process_response(
        &mut self,
        resp: crate::transport::ExecutedResponse,
        handle: &mut QueryHandle,
        query_attempt: &mut u32,
    ) -> StepOutcome {
        // A 307 redirect inside `Transport::execute` may have moved this
        // request to a different host/port than the one it started on; the
        // handle must track wherever the response actually came from so a
        // racing cancellation's DELETE lands on the right coordinator.
        handle.host = resp.served_host.clone();
        handle.port = resp.served_port;
        let json = resp.json.clone().unwrap_or(Value::Null);
        let result: QueryResults = match serde_json::from_value(json) {
            Ok(r) => r,
            Err(e) => {
                let _ = self.emit(Event::Error(PrestoClientError::from(e))).await;
                let _ = self.emit(Event::Close).await;
                return StepOutcome::Terminated;
            }
        };

        if let Some(id) = &result.id {
            if handle.query_id.is_none() {
                handle.query_id = Some(id.clone());
                if let EmitOutcome::Terminated = self.emit_checked(Event::Id(id.clone()), handle).await {
                    return StepOutcome::Terminated;
                }
            }
        }

        if !handle.info_emitted {
            if let Some(info_uri) = &result.info_uri {
                handle.info_emitted = true;
                if let EmitOutcome::Terminated =
                    self.emit_checked(Event::Info(info_uri.clone()), handle).await
                {
                    return StepOutcome::Terminated;
                }
            }
        }

        if let Some(columns) = &result.columns {
            if handle.columns.is_none() {
                handle.columns = Some(columns.clone());
                if let EmitOutcome::Terminated =
                    self.emit_checked(Event::Columns(columns.clone()), handle).await
                {
                    return StepOutcome::Terminated;
                }
            }
        }

        if let Some(stats) = &result.stats {
            if handle.last_state.as_deref() != Some(stats.state.as_str()) {
                handle.last_state = Some(stats.state.clone());
                if let EmitOutcome::Terminated =
                    self.emit_checked(Event::StateChange(stats.state.clone()), handle).await
                {
                    return StepOutcome::Terminated;
                }
            }
            if let EmitOutcome::Terminated = self.emit_checked(Event::Stats(stats.clone()), handle).await {
                return StepOutcome::Terminated;
            }
        }

        if let Some(error) = &result.error {
            return self.handle_presto_error(error, handle, query_attempt).await;
        }

        apply_session_update(&self.session, &result, &resp.headers);

        if let Some(data) = result.data.filter(|d| !d.is_empty()) {
            let columns = handle.columns.clone().unwrap_or_default();
            let page = build_page(&columns, data, self.decoder.as_ref(), self.row_format);
            handle.received = true;
            if let EmitOutcome::Terminated =
                self.emit_checked(Event::RawPageSize(page.len()), handle).await
            {
                return StepOutcome::Terminated;
            }
            if let EmitOutcome::Terminated = self.emit_checked(Event::Page(page), handle).await {
                return StepOutcome::Terminated;
            }
        }

        if let Some(raw_next) = &result.next_uri {
            match url::Url::parse(raw_next) {
                Ok(next) => handle.next_uri = Some(next),
                Err(_) => {
                    let err = PrestoClientError::Protocol(format!(
                        "Presto sent invalid nextUri: {raw_next}"
                    ));
                    let _ = self.emit(Event::Error(err)).await;
                    let _ = self.emit(Event::Close).await;
                    return StepOutcome::Terminated;
                }
            }
        } else {
            handle.upstream_finished = true;
        }

        StepOutcome::Continue
    }

    async fn handle_presto_error(
        &mut self,
        error: &crate::protocol::PrestoErrorBody,
        handle: &mut QueryHandle,
        query_attempt: &mut u32,
    ) -> StepOutcome {
        let presto_err = PrestoClientError::Presto {
            code: error.error_name.clone(),
            kind: error.error_type.clone(),
            message: format!("{}: {}", error.error_name, error.message),
            info: error.failure_info.clone(),
        };

        let retryable = RETRYABLE_PRESTO_ERRORS.contains(&error.error_name.as_str());
        if retryable && !handle.received && self.retry_budget.try_consume() {
            tracing::warn!(
                error_name = %error.error_name,
                attempt = *query_attempt,
                "retrying statement after transient presto error"
            );
            self.transition(State::Retrying);
            let delay = backoff_delay(*query_attempt, QUERY_BACKOFF_FLOOR, QUERY_BACKOFF_CEILING);
            *query_attempt += 1;
            if let EmitOutcome::Terminated = self.emit_checked(Event::Retry(delay), handle).await {
                return StepOutcome::Terminated;
            }
            handle.reset(&self.config);
            if !self.sleep_cancellable(delay, handle).await {
                return StepOutcome::Terminated;
            }
            return StepOutcome::RestartStatement;
        }

        self.transition(State::Errored);
        let _ = self.emit(Event::Error(presto_err)).await;
        let _ = self.emit(Event::Close).await;
        StepOutcome::Terminated
    }

    async fn terminate_with_cancel(&self, handle: &QueryHandle, cause: Option<PrestoClientError>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = &handle.query_id {
            tracing::info!(query_id = %id, "cancelling statement");
            if self.emit(Event::Cancel).await.is_err() {
                return;
            }
            let cancel_request = request::build_cancel_request(
                &self.config,
                self.config.protocol,
                &handle.host,
                handle.port,
                id,
            );
            let cancel_result = self.transport.execute_once(cancel_request).await;
            let cancel_error = cancel_result.err().map(Box::new);
            if cause.is_some() || cancel_error.is_some() {
                let _ = self
                    .emit(Event::Error(PrestoClientError::Cancelled {
                        cause: cause.map(Box::new),
                        cancel_error,
                    }))
                    .await;
            }
            let _ = self.emit(Event::Close).await;
        } else if let Some(cause) = cause {
            let _ = self
                .emit(Event::Error(PrestoClientError::Cancelled {
                    cause: Some(Box::new(cause)),
                    cancel_error: None,
                }))
                .await;
            let _ = self.emit(Event::Close).await;
        } else {
            let _ = self.emit(Event::Close).await;
        }
    }
}

fn apply_session_update(
    session: &Mutex<SessionStore>,
    result: &QueryResults,
    headers: &std::collections::HashMap<String, String>,
) {
    match result.update_type.as_deref() {
        Some("SET SESSION") => {
            if let Some(v) = headers.get("x-presto-set-session") {
                session
                    .lock()
                    .expect("session lock poisoned")
                    .apply(crate::session::SessionUpdate::Set, v);
            }
        }
        Some("RESET SESSION") => {
            if let Some(v) = headers.get("x-presto-clear-session") {
                session
                    .lock()
                    .expect("session lock poisoned")
                    .apply(crate::session::SessionUpdate::Clear, v);
            }
        }
        _ => {}
    }
}

/// Builds a decoded [`Page`] from one response's raw row data.
fn build_page(
    columns: &[Column],
    data: Vec<Vec<Value>>,
    decoder: &dyn ColumnDecoder,
    row_format: RowFormat,
) -> Page {
    data.into_iter()
        .map(|raw_row| {
            let decoded: Vec<Value> = raw_row
                .into_iter()
                .enumerate()
                .map(|(i, value)| match columns.get(i) {
                    Some(column) => decoder.decode(column, value),
                    None => value,
                })
                .collect();
            match row_format {
                RowFormat::Array => crate::protocol::Row::Array(decoded),
                RowFormat::Object => {
                    let mut map = serde_json::Map::with_capacity(decoded.len());
                    for (i, value) in decoded.into_iter().enumerate() {
                        let name = columns
                            .get(i)
                            .map(|c| c.name.clone())
                            .unwrap_or_else(|| i.to_string());
                        map.insert(name, value);
                    }
                    crate::protocol::Row::Object(map)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DefaultDecoder;
    use serde_json::json;

    fn column(name: &str, type_name: &str) -> Column {
        Column {
            name: name.to_string(),
            type_name: type_name.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn build_page_object_format() {
        let columns = vec![column("a", "bigint"), column("b", "bigint")];
        let data = vec![vec![json!(0), json!(0)], vec![json!(1), json!(1)]];
        let page = build_page(&columns, data, &DefaultDecoder, RowFormat::Object);
        assert_eq!(page.len(), 2);
        match &page[0] {
            crate::protocol::Row::Object(map) => {
                assert_eq!(map.get("a"), Some(&json!(0)));
                assert_eq!(map.get("b"), Some(&json!(0)));
            }
            other => panic!("expected object row, got {other:?}"),
        }
    }

    #[test]
    fn build_page_array_format() {
        let columns = vec![column("a", "bigint")];
        let data = vec![vec![json!(42)]];
        let page = build_page(&columns, data, &DefaultDecoder, RowFormat::Array);
        assert_eq!(page, vec![crate::protocol::Row::Array(vec![json!(42)])]);
    }

    #[test]
    fn build_page_decodes_timestamp_columns() {
        let columns = vec![column("ts", "timestamp")];
        let data = vec![vec![json!("2024-01-15 10:30:00")]];
        let page = build_page(&columns, data, &DefaultDecoder, RowFormat::Array);
        assert_eq!(
            page,
            vec![crate::protocol::Row::Array(vec![json!("2024-01-15T10:30:00Z")])]
        );
    }

    #[test]
    fn retryable_presto_error_codes() {
        assert!(RETRYABLE_PRESTO_ERRORS.contains(&"SERVER_STARTING_UP"));
        assert!(RETRYABLE_PRESTO_ERRORS.contains(&"HIVE_METASTORE_ERROR"));
        assert!(RETRYABLE_PRESTO_ERRORS.contains(&"TOO_MANY_REQUESTS_FAILED"));
        assert!(RETRYABLE_PRESTO_ERRORS.contains(&"PAGE_TRANSPORT_TIMEOUT"));
        assert!(!RETRYABLE_PRESTO_ERRORS.contains(&"SYNTAX_ERROR"));
    }

    #[test]
    fn query_handle_reset_preserves_received_clears_rest() {
        let config = ClientConfig::default();
        let mut handle = QueryHandle {
            query_id: Some("q1".to_string()),
            columns: Some(vec![column("a", "bigint")]),
            next_uri: Some(url::Url::parse("http://localhost:8080/x").unwrap()),
            previous_path: Some("/x".to_string()),
            upstream_finished: false,
            received: true,
            info_emitted: true,
            last_state: Some("RUNNING".to_string()),
            host: "localhost".to_string(),
            port: Some(8080),
        };
        handle.reset(&config);
        assert!(handle.query_id.is_none());
        assert!(handle.columns.is_none());
        assert!(handle.next_uri.is_none());
        assert!(handle.previous_path.is_none());
        assert!(!handle.info_emitted);
        assert!(handle.last_state.is_none());
        assert!(handle.received, "received must survive a restart reset");
    }
}
