//! Client facade
//!
//! Thin, stateful wrapper tying [`ClientConfig`], the shared [`SessionStore`],
//! and the shared [`Transport`] together, and spawning one [`Engine`] per
//! statement. The accessors here (`query`, `query_pages`, `session_snapshot`,
//! `set_timeout`, `reset_timeout`, `reset_session`) are the "thin convenience
//! wrappers over the core" the specification calls out of scope for detailed
//! design; their bodies are a handful of lines each.

use std::sync::{Arc, Mutex, RwLock};

use crate::config::ClientConfig;
use crate::engine::{Engine, EngineParams};
use crate::error::Result;
use crate::protocol::{RowFormat, Statement};
use crate::session::{validate_session_key, validate_session_value, SessionStore, SessionValue};
use crate::stream::{PageStream, QueryStream};
use crate::transport::{Sleeper, TokioSleeper, Transport};
use crate::value::{ColumnDecoder, DefaultDecoder};

const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Per-statement options for [`Client::query_with`].
#[derive(Clone)]
pub struct QueryOptions {
    /// Extra headers merged in after client-level headers (last-wins).
    pub headers: Vec<(String, String)>,
    /// Row shape: object (default) or array.
    pub row_format: RowFormat,
    /// Downstream buffer target, in pages.
    pub high_water_mark: usize,
    /// Value decoder; defaults to timestamp-only coercion.
    pub decoder: Arc<dyn ColumnDecoder>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            row_format: RowFormat::default(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            decoder: Arc::new(DefaultDecoder),
        }
    }
}

/// Per-statement options for [`Client::query_pages_with`].
#[derive(Clone)]
pub struct PageOptions {
    /// Extra headers merged in after client-level headers (last-wins).
    pub headers: Vec<(String, String)>,
    /// Row shape: object (default) or array.
    pub row_format: RowFormat,
    /// Max rows per emitted page; `0` disables slicing.
    pub page_size: usize,
    /// Downstream buffer target, in pages.
    pub high_water_mark: usize,
    /// Value decoder; defaults to timestamp-only coercion.
    pub decoder: Arc<dyn ColumnDecoder>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            row_format: RowFormat::default(),
            page_size: 0,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            decoder: Arc::new(DefaultDecoder),
        }
    }
}

/// A Presto/Trino HTTP statement protocol client.
///
/// Cheaply cloneable is not implemented directly; wrap in `Arc<Client>` to
/// share across tasks. The session store and transport are already shared
/// internally, so concurrent statements observe the same session state.
pub struct Client {
    config: Arc<ClientConfig>,
    transport: RwLock<Arc<Transport>>,
    session: Arc<Mutex<SessionStore>>,
    sleeper: Arc<dyn Sleeper>,
}

impl Client {
    /// Builds a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    /// Builds a client with an injected sleeper, for deterministic tests.
    pub fn with_sleeper(config: ClientConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let transport = Arc::new(Transport::with_sleeper(config.socket_timeout, Arc::clone(&sleeper)));
        Self {
            config: Arc::new(config),
            transport: RwLock::new(transport),
            session: Arc::new(Mutex::new(SessionStore::new())),
            sleeper,
        }
    }

    /// Runs `sql` and returns a row stream, using default [`QueryOptions`].
    pub fn query(&self, sql: &str) -> Result<QueryStream> {
        self.query_with(sql, QueryOptions::default())
    }

    /// Runs `sql` and returns a row stream with the given options.
    pub fn query_with(&self, sql: &str, options: QueryOptions) -> Result<QueryStream> {
        let statement = Statement::try_from(sql)?;
        let (event_rx, cmd_tx) = Engine::spawn(self.engine_params(
            statement,
            options.headers,
            options.row_format,
            options.decoder,
            options.high_water_mark,
        ));
        Ok(QueryStream::new(event_rx, cmd_tx))
    }

    /// Runs `sql` and returns a page stream, using default [`PageOptions`].
    pub fn query_pages(&self, sql: &str) -> Result<PageStream> {
        self.query_pages_with(sql, PageOptions::default())
    }

    /// Runs `sql` and returns a page stream with the given options.
    pub fn query_pages_with(&self, sql: &str, options: PageOptions) -> Result<PageStream> {
        let statement = Statement::try_from(sql)?;
        let (event_rx, cmd_tx) = Engine::spawn(self.engine_params(
            statement,
            options.headers,
            options.row_format,
            options.decoder,
            options.high_water_mark,
        ));
        Ok(PageStream::new(event_rx, cmd_tx, options.page_size))
    }

    fn engine_params(
        &self,
        statement: Statement,
        headers: Vec<(String, String)>,
        row_format: RowFormat,
        decoder: Arc<dyn ColumnDecoder>,
        high_water_mark: usize,
    ) -> EngineParams {
        EngineParams {
            config: Arc::clone(&self.config),
            transport: self.transport.read().expect("transport lock poisoned").clone(),
            session: Arc::clone(&self.session),
            statement,
            per_request_headers: headers,
            row_format,
            decoder,
            sleeper: Arc::clone(&self.sleeper),
            high_water_mark,
        }
    }

    /// A snapshot of the current session properties, in insertion order.
    pub fn session_snapshot(&self) -> Vec<(String, String)> {
        self.session.lock().expect("session lock poisoned").snapshot()
    }

    /// Locally records a session property as if the coordinator had already
    /// confirmed a `SET SESSION <key> = <value>`.
    ///
    /// Per §3/§7, the session store is ordinarily mutated only by successful
    /// response processing (§4.2); this accessor is a local override for
    /// callers who already know the server-side session state out of band
    /// (e.g. restoring a session snapshot across a process restart). Ordinary
    /// `SET SESSION` flows issued through a statement go through §4.2
    /// automatically and do not need this call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PrestoClientError::InvalidSessionKey`] if
    /// `key` does not match `^[a-z]+[a-z_.]*[a-z]+$`, or
    /// [`crate::error::PrestoClientError::InvalidSessionValue`] if `value`
    /// is a non-finite number.
    pub fn session(&self, key: &str, value: SessionValue) -> Result<()> {
        validate_session_key(key)?;
        validate_session_value(key, &value)?;
        let raw = format!("{key}={}", value.to_wire_string());
        self.session
            .lock()
            .expect("session lock poisoned")
            .set(key, raw);
        Ok(())
    }

    /// Locally clears a single session property, as if the coordinator had
    /// already confirmed a `RESET SESSION <key>`. See [`Client::session`]
    /// for when a local override like this is appropriate.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PrestoClientError::InvalidSessionKey`] if
    /// `key` does not match `^[a-z]+[a-z_.]*[a-z]+$`.
    pub fn reset_session(&self, key: &str) -> Result<()> {
        validate_session_key(key)?;
        self.session.lock().expect("session lock poisoned").clear(key);
        Ok(())
    }

    /// Clears every locally accumulated session property.
    pub fn clear_session(&self) {
        *self.session.lock().expect("session lock poisoned") = SessionStore::new();
    }

    /// Overrides the per-request socket timeout for subsequent statements.
    /// Statements already in flight keep their original timeout.
    pub fn set_timeout(&self, timeout: std::time::Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(crate::error::PrestoClientError::InvalidDuration {
                field: "socket_timeout",
                value: timeout,
            });
        }
        let transport = Arc::new(Transport::with_sleeper(timeout, Arc::clone(&self.sleeper)));
        *self.transport.write().expect("transport lock poisoned") = transport;
        Ok(())
    }

    /// Restores the per-request socket timeout to the value from the
    /// original [`ClientConfig`].
    pub fn reset_timeout(&self) -> Result<()> {
        self.set_timeout(self.config.socket_timeout)
    }
}
