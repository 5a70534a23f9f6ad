//! # presto-stream
//!
//! Async streaming client for the Presto/Trino HTTP statement protocol (v1)
//! that lets you consume query results of any size without running out of
//! memory.
//!
//! ## Why?
//!
//! The v1 protocol pages results across a chain of `nextUri` responses. A
//! client that collects the chain eagerly buffers the whole result:
//!
//! ```ignore
//! // This will OOM with millions of rows!
//! let rows: Vec<Row> = client.query(sql).await?;
//! ```
//!
//! `presto-stream` drives the chain lazily behind a back-pressured stream:
//!
//! ```ignore
//! // Process millions of rows with constant memory usage
//! let mut rows = client.query_stream(sql)?;
//! while let Some(row) = rows.next().await {
//!     process(row?);
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use presto_stream::{Client, ClientConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(
//!         ClientConfig::new("localhost", 8080)
//!             .with_user("alice")
//!             .with_catalog("hive")
//!             .with_schema("default"),
//!     )?;
//!
//!     client.set_session("query_priority", 1).await?;
//!
//!     let mut rows = client.query_stream(
//!         "SELECT orderkey, totalprice FROM orders",
//!     )?;
//!     while let Some(row) = rows.next().await {
//!         let row = row?;
//!         println!(
//!             "{}: {:?}",
//!             row.get("orderkey").unwrap(),
//!             row.get("totalprice")
//!         );
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Memory efficient**: one page in flight, back-pressure all the way to
//!   the coordinator
//! - **Async native**: built on tokio, futures and reqwest
//! - **Protocol complete**: 307 redirects, 503 back-off, transient-error
//!   query restart, `DELETE` cancellation, session accumulation
//! - **Observable**: a typed event stream (query id, columns, stats, state
//!   changes, retries) through a caller-supplied observer
//! - **Error handling**: all failures surface as typed `Error`s through the
//!   stream, no panics

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod events;
pub mod protocol;
mod request;
pub mod session;
pub mod stream;
mod transport;
pub mod value;

// Re-export main types at crate root
pub use client::Client;
pub use config::{ClientConfig, Protocol, QueryOptions, RowFormat};
pub use error::{Error, Result};
pub use events::{QueryEvent, QueryObserver};
pub use protocol::{Column, QueryResults, StatementStats};
pub use session::SessionValue;
pub use stream::{PageStream, RowStream};
pub use value::{Page, Row, Value};
