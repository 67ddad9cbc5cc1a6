//! Keeps in-process materialized views synchronized with Postgres tables
//! via LISTEN/NOTIFY-based change-data-capture, with reload-on-reconnect
//! recovery when the listening connection drops (spec.md §1).
//!
//! The two halves that matter:
//!
//! - The **notification pipeline** ([`notifier`]): trigger installation
//!   ([`sql`]), the JSON envelope ([`envelope`]), the listen loop, and
//!   reload-on-reconnect.
//! - The **materialization engine** ([`binding`], [`table`]): a typed
//!   mapping from row fields into caller-owned nested containers, with
//!   save/remove/clear primitives that preserve the invariants in spec.md
//!   §3 (no orphan keys, strictly sorted sorted-set leaves).
//!
//! [`listener::Listener`] is the top-level entry point most callers want.

#[macro_use]
extern crate failure;

pub mod binding;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod listener;
pub mod logger;
pub mod notifier;
pub mod query;
pub mod schema;
pub mod sql;
pub mod table;

pub use binding::Binding;
pub use error::Error;
pub use handler::Handler;
pub use listener::{Listener, TableSpec};
pub use logger::{shared, Logger, SlogLogger};
pub use notifier::Notifier;
pub use query::{PoolExecutor, QueryExecutor};
pub use schema::{ColumnType, Field, RowSchema};
pub use table::{BigColumns, TableHandler};
