//! The query executor contract (spec.md §6 "Query executor contract"):
//! `Query(dest, sql)`. The out-of-scope boundary (spec.md §1 "the database
//! driver and connection pool") means this crate never talks to a socket
//! directly for auxiliary queries — it hands SQL to whatever the caller
//! supplies, exactly as the teacher's own store components take a
//! `Store`/pool handle rather than opening connections themselves.
//!
//! Decoding is uniformly `serde_json::from_value`, never a hand-rolled row
//! walker (SPEC_FULL §3): the one concrete adapter ([`PoolExecutor`]) gets
//! there by wrapping every query in `row_to_json`, so any `Row: Deserialize`
//! works without per-column `FromSql` glue.

use crate::error::Error;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Executes arbitrary SQL and hands back JSON rows (spec.md §6). Kept
/// object-safe (no generic methods) so `Arc<dyn QueryExecutor>` can be
/// shared across every table handler.
pub trait QueryExecutor: Send + Sync {
    /// Runs `sql` and returns one JSON object per result row.
    fn query_json(&self, sql: &str) -> Result<Vec<Value>, Error>;
}

/// Decodes the rows `exec` returns for `sql` into `Row`, per SPEC_FULL §3
/// ("we require `serde::de::DeserializeOwned` on the row type").
pub fn query_all<Row: DeserializeOwned>(exec: &dyn QueryExecutor, sql: &str) -> Result<Vec<Row>, Error> {
    exec.query_json(sql)?
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(Error::from))
        .collect()
}

/// Decodes the single row `exec` returns for `sql` into `Row`. Errors if the
/// query returns zero or more than one row (used by the big-columns
/// side-load, spec.md §4.2, which is keyed on a row's identity and expects
/// exactly one match).
pub fn query_one<Row: DeserializeOwned>(exec: &dyn QueryExecutor, sql: &str) -> Result<Row, Error> {
    let mut rows = exec.query_json(sql)?;
    match rows.len() {
        1 => serde_json::from_value(rows.remove(0)).map_err(Error::from),
        0 => Err(Error::other(format!("query returned no rows: {}", sql))),
        n => Err(Error::other(format!("query returned {} rows, expected 1: {}", n, sql))),
    }
}

/// Concrete adapter onto an `r2d2`-pooled `postgres` connection, matching
/// the teacher's `r2d2`/`r2d2-postgres` dependency pair. This is the
/// auxiliary pool spec.md §5 "Resource bounds" distinguishes from the
/// single pinned listening connection ([`crate::notifier::Notifier`] owns
/// that one separately).
pub struct PoolExecutor {
    pool: Pool<PostgresConnectionManager>,
}

impl PoolExecutor {
    pub fn new(pool: Pool<PostgresConnectionManager>) -> Self {
        PoolExecutor { pool }
    }
}

impl QueryExecutor for PoolExecutor {
    fn query_json(&self, sql: &str) -> Result<Vec<Value>, Error> {
        let conn = self.pool.get()?;
        let wrapped = format!("SELECT row_to_json(t)::text AS j FROM ({}) t", sql);
        let rows = conn.query(&wrapped, &[])?;
        rows.iter()
            .map(|row| {
                let text: String = row.get("j");
                serde_json::from_str(&text).map_err(Error::from)
            })
            .collect()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory executor for tests that never touches Postgres: the
    /// caller pre-seeds the JSON rows a given `sql` should "return".
    #[derive(Default)]
    pub struct FakeExecutor {
        responses: Mutex<std::collections::HashMap<String, Vec<Value>>>,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            FakeExecutor::default()
        }

        pub fn seed(&self, sql: impl Into<String>, rows: Vec<Value>) {
            self.responses.lock().unwrap().insert(sql.into(), rows);
        }
    }

    impl QueryExecutor for FakeExecutor {
        fn query_json(&self, sql: &str) -> Result<Vec<Value>, Error> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(sql)
                .cloned()
                .unwrap_or_default())
        }
    }
}
