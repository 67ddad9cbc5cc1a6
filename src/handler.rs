//! The four-method handler contract (spec.md §4.1/§6), grounded on
//! `original_source/notifier.go`'s `Handler` interface and
//! `example_listen_test.go`'s `testHandler`. `Notifier::register` takes a
//! `Handler` directly for the raw API; `TableHandler<Row>` (in `table.rs`)
//! is the materialization engine's own implementation of it.

/// Sink for change events on one table. Buffers are the raw JSON text of
/// the projected row (spec.md §3's `Old`/`New` objects), left undecoded at
/// this layer so the raw `Notifier::register` API has no dependency on any
/// particular row type.
pub trait Handler: Send + Sync {
    fn create(&self, table: &str, new_buf: &str);
    fn update(&self, table: &str, old_buf: &str, new_buf: &str);
    fn delete(&self, table: &str, old_buf: &str);
    /// Connection to the database was lost (or this is the synthetic
    /// initial-load signal sent right after subscribing). Implementations
    /// are expected to reload from scratch; failures are the handler's to
    /// log, not the notifier's (spec.md §4.2).
    fn conn_loss(&self, table: &str);
}
