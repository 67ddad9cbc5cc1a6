//! Table handler: aggregates bindings for one table and implements the
//! four-method [`Handler`] contract by decoding rows and fanning updates to
//! every binding (spec.md §4.2). Grounded on
//! `examples/original_source/table.go`'s `Table` struct, generalized from
//! its `reflect`-based `Datas []*Data` to a statically typed
//! `Vec<Box<dyn Binding<Row, Views>>>` per SPEC_FULL §3/§4.4.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;

use crate::binding::Binding;
use crate::envelope::{Action, Envelope};
use crate::handler::Handler;
use crate::logger::Logger;
use crate::query::{self, QueryExecutor};

/// Optional side-load of columns too large for the 8 KB NOTIFY payload
/// (spec.md §4.2 "Big-columns side-load"), grounded on `table.go`'s
/// `BigColumns`/`BigColumnsLoadKeys`/`bigColumnsLoadSql`.
pub struct BigColumns<Row> {
    /// Builds the side-load `SELECT ... WHERE ...` from the already-decoded
    /// row (the Go source's `bigColumnsLoadSql` `Sprintf` template plus
    /// `BigColumnsLoadKeys`, collapsed into one closure since Rust has no
    /// reflection-driven field lookup to drive generically).
    load_sql: Box<dyn Fn(&Row) -> String + Send + Sync>,
    /// Merges the side-loaded row into the row the event decoded.
    merge: Box<dyn Fn(Row, Row) -> Row + Send + Sync>,
}

impl<Row: DeserializeOwned> BigColumns<Row> {
    pub fn new(
        load_sql: impl Fn(&Row) -> String + Send + Sync + 'static,
        merge: impl Fn(Row, Row) -> Row + Send + Sync + 'static,
    ) -> Self {
        BigColumns {
            load_sql: Box::new(load_sql),
            merge: Box::new(merge),
        }
    }
}

/// Implements the [`Handler`] contract by decoding JSON buffers into `Row`
/// and fanning `save`/`remove`/`clear` out to every registered binding
/// (spec.md §4.2). `Views` is the caller's plain struct of target mappings,
/// shared under one lock across every binding of this table (spec.md §9
/// "Shared mutex across bindings").
pub struct TableHandler<Row, Views> {
    table: String,
    views: Arc<RwLock<Views>>,
    bindings: Vec<Box<dyn Binding<Row, Views>>>,
    big_columns: Option<BigColumns<Row>>,
    load_sql: String,
    query: Arc<dyn QueryExecutor>,
    logger: Arc<dyn Logger>,
}

impl<Row, Views> TableHandler<Row, Views>
where
    Row: DeserializeOwned + Send + Sync + 'static,
    Views: Send + Sync + 'static,
{
    pub fn new(
        table: impl Into<String>,
        views: Arc<RwLock<Views>>,
        bindings: Vec<Box<dyn Binding<Row, Views>>>,
        load_sql: impl Into<String>,
        query: Arc<dyn QueryExecutor>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        TableHandler {
            table: table.into(),
            views,
            bindings,
            big_columns: None,
            load_sql: load_sql.into(),
            query,
            logger,
        }
    }

    pub fn with_big_columns(mut self, big_columns: BigColumns<Row>) -> Self {
        self.big_columns = Some(big_columns);
        self
    }

    fn decode(&self, buf: &str) -> Option<Row> {
        match serde_json::from_str::<Row>(buf) {
            Ok(row) => Some(row),
            Err(e) => {
                self.logger
                    .errorf(format_args!("table {}: could not decode row payload: {}", self.table, e));
                None
            }
        }
    }

    fn side_load(&self, row: Row) -> Row {
        let big = match &self.big_columns {
            Some(big) => big,
            None => return row,
        };
        let sql = (big.load_sql)(&row);
        match query::query_one::<Row>(self.query.as_ref(), &sql) {
            Ok(extra) => (big.merge)(row, extra),
            Err(e) => {
                self.logger.errorf(format_args!(
                    "table {}: big-columns side-load failed, dropping event: {}",
                    self.table, e
                ));
                row
            }
        }
    }

    fn save_row(&self, row: Row) {
        let row = Arc::new(self.side_load(row));
        let mut views = self.views.write().unwrap();
        for binding in &self.bindings {
            binding.save(&mut views, &row);
        }
    }

    fn remove_row(&self, row: Row) {
        let row = Arc::new(row);
        let mut views = self.views.write().unwrap();
        for binding in &self.bindings {
            binding.remove(&mut views, &row);
        }
    }

    /// Full repopulation from a fresh query (spec.md §4.2 "Reload
    /// algorithm"): `clear()` every binding, then `save()` every row, all
    /// under one write-lock acquisition so readers never observe a partial
    /// rebuild (spec.md §5 "Reload vs. live events").
    pub fn reload(&self) -> Result<(), crate::error::Error> {
        let rows: Vec<Row> = query::query_all(self.query.as_ref(), &self.load_sql)?;
        let mut views = self.views.write().unwrap();
        for binding in &self.bindings {
            binding.clear(&mut views);
        }
        for row in rows {
            let row = Arc::new(row);
            for binding in &self.bindings {
                binding.save(&mut views, &row);
            }
        }
        Ok(())
    }
}

impl<Row, Views> Handler for TableHandler<Row, Views>
where
    Row: DeserializeOwned + Send + Sync + 'static,
    Views: Send + Sync + 'static,
{
    fn create(&self, table: &str, new_buf: &str) {
        if let Some(row) = self.decode(new_buf) {
            self.save_row(row);
        }
        let _ = table;
    }

    fn update(&self, table: &str, old_buf: &str, new_buf: &str) {
        // Remove-then-save (spec.md §4.2 rationale, §9 "Open question —
        // ordering of save and remove in Update"): the post-image's key
        // path may differ from the pre-image's, so removing first avoids
        // an orphan entry at the old path.
        if let Some(old) = self.decode(old_buf) {
            self.remove_row(old);
        }
        if let Some(new) = self.decode(new_buf) {
            self.save_row(new);
        }
        let _ = table;
    }

    fn delete(&self, table: &str, old_buf: &str) {
        if let Some(row) = self.decode(old_buf) {
            self.remove_row(row);
        }
        let _ = table;
    }

    fn conn_loss(&self, table: &str) {
        if let Err(e) = self.reload() {
            self.logger
                .errorf(format_args!("table {}: reload after connection loss failed: {}", table, e));
        }
    }
}

/// Dispatches a decoded [`Envelope`] to a [`Handler`] by `Action` (spec.md
/// §4.1 "Real notification"), matching the teacher's switch in
/// `notifier.go`'s `handle`. Lives here (not in `notifier.rs`) because it's
/// pure routing logic with no connection-handling concerns, easy to unit
/// test without a live Postgres connection.
pub fn dispatch(handler: &dyn Handler, table: &str, envelope: &Envelope) {
    let old = envelope.old.as_ref().map(|v| v.to_string());
    let new = envelope.new.as_ref().map(|v| v.to_string());
    match envelope.action {
        Action::Insert => {
            if let Some(new) = new {
                handler.create(table, &new);
            }
        }
        Action::Update => {
            if let (Some(old), Some(new)) = (old, new) {
                handler.update(table, &old, &new);
            }
        }
        Action::Delete => {
            if let Some(old) = old {
                handler.delete(table, &old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::test_support::RecordingLogger;
    use crate::query::test_support::FakeExecutor;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Student {
        id: i64,
        name: String,
        class: String,
    }

    #[derive(Default)]
    struct Views {
        by_id: HashMap<i64, Student>,
        by_class: HashMap<String, Vec<Student>>,
    }

    fn handler() -> (TableHandler<Student, Views>, Arc<RwLock<Views>>, Arc<FakeExecutor>) {
        let views = Arc::new(RwLock::new(Views::default()));
        let exec = Arc::new(FakeExecutor::new());
        let logger = crate::logger::shared(RecordingLogger::default());
        let by_id: Box<dyn Binding<Student, Views>> = Box::new(crate::binding::Single::new(
            |v: &mut Views| &mut v.by_id,
            |r: &Arc<Student>| r.id,
            |r: &Arc<Student>| (**r).clone(),
        ));
        let by_class: Box<dyn Binding<Student, Views>> = Box::new(crate::binding::SingleSorted::new(
            |v: &mut Views| &mut v.by_class,
            |r: &Arc<Student>| r.class.clone(),
            |r: &Arc<Student>| (**r).clone(),
            |s: &Student| s.id,
        ));
        let handler = TableHandler::new(
            "students",
            views.clone(),
            vec![by_id, by_class],
            "SELECT id, name, class FROM students",
            exec.clone(),
            logger,
        );
        (handler, views, exec)
    }

    #[test]
    fn create_fans_out_to_every_binding() {
        let (handler, views, _exec) = handler();
        handler.create("public.students", r#"{"id":1,"name":"李雷","class":"初三1班"}"#);
        let v = views.read().unwrap();
        assert_eq!(v.by_id[&1].name, "李雷");
        assert_eq!(v.by_class["初三1班"].len(), 1);
    }

    #[test]
    fn update_removes_old_path_before_saving_new() {
        let (handler, views, _exec) = handler();
        handler.create("public.students", r#"{"id":1,"name":"李雷","class":"初三1班"}"#);
        handler.update(
            "public.students",
            r#"{"id":1,"name":"李雷","class":"初三1班"}"#,
            r#"{"id":1,"name":"李雷","class":"初三2班"}"#,
        );
        let v = views.read().unwrap();
        assert!(!v.by_class.contains_key("初三1班"));
        assert_eq!(v.by_class["初三2班"].len(), 1);
        assert_eq!(v.by_id[&1].class, "初三2班");
    }

    #[test]
    fn delete_removes_from_every_binding() {
        let (handler, views, _exec) = handler();
        handler.create("public.students", r#"{"id":1,"name":"李雷","class":"初三1班"}"#);
        handler.delete("public.students", r#"{"id":1,"name":"李雷","class":"初三1班"}"#);
        let v = views.read().unwrap();
        assert!(v.by_id.is_empty());
        assert!(v.by_class.is_empty());
    }

    #[test]
    fn conn_loss_reloads_from_the_query_executor() {
        let (handler, views, exec) = handler();
        exec.seed(
            "SELECT id, name, class FROM students",
            vec![
                json!({"id": 1, "name": "李雷", "class": "初三1班"}),
                json!({"id": 2, "name": "韩梅梅", "class": "初三1班"}),
            ],
        );
        handler.conn_loss("public.students");
        let v = views.read().unwrap();
        assert_eq!(v.by_id.len(), 2);
        assert_eq!(v.by_class["初三1班"].len(), 2);
    }

    #[test]
    fn reload_is_idempotent() {
        let (handler, views, exec) = handler();
        exec.seed(
            "SELECT id, name, class FROM students",
            vec![json!({"id": 1, "name": "李雷", "class": "初三1班"})],
        );
        handler.reload().unwrap();
        let first: Vec<i64> = views.read().unwrap().by_id.keys().copied().collect();
        handler.reload().unwrap();
        let second: Vec<i64> = views.read().unwrap().by_id.keys().copied().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_payload_is_dropped_not_panicked() {
        let (handler, views, _exec) = handler();
        handler.create("public.students", "not json");
        assert!(views.read().unwrap().by_id.is_empty());
    }

    #[test]
    fn dispatch_routes_by_action() {
        let (handler, views, _exec) = handler();
        let insert = Envelope::parse(r#"{"Action":"INSERT","New":{"id":1,"name":"李雷","class":"初三1班"}}"#).unwrap();
        dispatch(&handler, "public.students", &insert);
        assert_eq!(views.read().unwrap().by_id.len(), 1);

        let delete = Envelope::parse(r#"{"Action":"DELETE","Old":{"id":1,"name":"李雷","class":"初三1班"}}"#).unwrap();
        dispatch(&handler, "public.students", &delete);
        assert!(views.read().unwrap().by_id.is_empty());
    }
}
