//! `lento`: a streaming client for the Presto/Trino HTTP statement protocol.
//!
//! Submits a SQL statement, follows the protocol's `nextUri` chain to
//! completion, and hands back a lazy, back-pressured sequence of rows or
//! pages. Session properties set via `SET SESSION` are tracked automatically
//! and attached to subsequent statements on the same client.
//!
//! ```no_run
//! use lento::{Client, ClientConfigBuilder};
//!
//! # async fn run() -> lento::Result<()> {
//! let config = ClientConfigBuilder::new()
//!     .hostname("localhost")
//!     .port(8080)
//!     .user("alice")
//!     .build()?;
//! let client = Client::new(config);
//!
//! let mut rows = client.query("SELECT 1")?;
//! while let Some(row) = rows.next().await {
//!     let _row = row?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub(crate) mod request;
pub mod session;
pub mod stream;
pub mod transport;
pub mod value;

pub use client::{Client, PageOptions, QueryOptions};
pub use config::{ClientConfig, ClientConfigBuilder, Protocol};
pub use error::{PrestoClientError, Result};
pub use protocol::{Column, Page, Row, RowFormat, Statement, StatementStats};
pub use session::{SessionStore, SessionValue};
pub use stream::{Canceller, PageStream, QueryStream, StreamMeta};
pub use value::{ColumnDecoder, DefaultDecoder};
