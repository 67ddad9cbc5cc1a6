//! SQL emitted to install the schema-wide trigger function and per-table
//! triggers (spec.md §4.4). Specified as an exact string contract rather
//! than derived from a SQL-building crate, matching how the teacher's own
//! `functions.rs` (referenced but not retrieved into this pack) is a thin
//! wrapper that hands literal SQL to `diesel::select`; here we hand literal
//! SQL straight to the caller-supplied executor. The shape (`json_build_object`
//! keyed by `Action`/`Old`/`New`, `pg_notify` on a per-table channel,
//! `row_to_json` projections, suppressing `UPDATE` when the check projection
//! is unchanged) is the idiom seen across `examples/other_examples/*pg_notify*`
//! and `*subscription-broker*`, adapted to the exact envelope keys spec.md
//! mandates.

/// Name of the schema-level trigger function every table's trigger calls
/// into. Process-wide state in the database (spec.md §9 "Global trigger
/// function"): installation must be idempotent, hence `CREATE OR REPLACE`.
pub const NOTIFY_FUNCTION_NAME: &str = "notify_trigger";

/// Body of `notify_trigger()`. `TG_ARGV[0]` is the channel name,
/// `TG_ARGV[1]` the notify projection, `TG_ARGV[2]` the check projection —
/// both injected per-trigger at `CREATE TRIGGER` time (see
/// [`create_trigger_sql`]), never interpolated into this function body
/// itself.
pub fn create_notify_function_sql() -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
DECLARE
  channel     text := TG_ARGV[0];
  notify_cols text := TG_ARGV[1];
  check_cols  text := TG_ARGV[2];
  old_json    json;
  new_json    json;
  old_check   jsonb;
  new_check   jsonb;
BEGIN
  IF TG_OP = 'DELETE' THEN
    EXECUTE format('SELECT row_to_json(r) FROM (SELECT %s FROM (SELECT ($1).*) x) r', notify_cols)
      INTO old_json USING OLD;
    PERFORM pg_notify(channel, json_build_object('Action', TG_OP, 'Old', old_json)::text);
    RETURN OLD;
  END IF;

  EXECUTE format('SELECT row_to_json(r) FROM (SELECT %s FROM (SELECT ($1).*) x) r', notify_cols)
    INTO new_json USING NEW;

  IF TG_OP = 'UPDATE' THEN
    EXECUTE format('SELECT row_to_json(r) FROM (SELECT %s FROM (SELECT ($1).*) x) r', notify_cols)
      INTO old_json USING OLD;
    EXECUTE format('SELECT row_to_json(r)::jsonb FROM (SELECT %s FROM (SELECT ($1).*) x) r', check_cols)
      INTO old_check USING OLD;
    EXECUTE format('SELECT row_to_json(r)::jsonb FROM (SELECT %s FROM (SELECT ($1).*) x) r', check_cols)
      INTO new_check USING NEW;
    IF old_check = new_check THEN
      RETURN NEW;
    END IF;
    PERFORM pg_notify(channel, json_build_object('Action', TG_OP, 'Old', old_json, 'New', new_json)::text);
    RETURN NEW;
  END IF;

  PERFORM pg_notify(channel, json_build_object('Action', TG_OP, 'New', new_json)::text);
  RETURN NEW;
END;
$$ LANGUAGE plpgsql;"#,
        function = NOTIFY_FUNCTION_NAME
    )
}

/// `notify_<table>_trigger`, per spec.md §4.4/§6. `table` should be the bare
/// (unqualified) table name; the trigger itself is scoped to the qualified
/// table by `CREATE TRIGGER ... ON <qualified_table>`.
pub fn trigger_name(table: &str) -> String {
    format!("notify_{}_trigger", table)
}

/// `pgnotify_<schema>.<table>`, per spec.md §4.4/§6. This is the only place
/// an unqualified `schema` is normalized to `public` (spec.md §9 "Open
/// question — default schema resolution"); handler callbacks still receive
/// whatever table name the caller registered with.
pub fn channel_name(schema: &str, table: &str) -> String {
    let schema = if schema.is_empty() { "public" } else { schema };
    format!("pgnotify_{}.{}", schema, table)
}

/// Splits `"schema.table"` into `(schema, table)`, defaulting `schema` to
/// `"public"` when `table` carries no schema prefix (spec.md §9 "Open
/// question — default schema resolution").
pub fn split_schema(table: &str) -> (&str, &str) {
    match table.split_once('.') {
        Some((schema, rest)) => (schema, rest),
        None => ("public", table),
    }
}

/// Drops and recreates the per-table trigger so the current projections
/// always take effect, per spec.md §4.4 ("dropped-and-recreated on
/// registration"). `qualified_table` is `schema.table` (or bare `table`
/// when the schema is the default search path entry).
pub fn create_trigger_sql(
    table: &str,
    qualified_table: &str,
    channel: &str,
    notify_columns: &str,
    check_columns: &str,
) -> String {
    let name = trigger_name(table);
    format!(
        r#"DROP TRIGGER IF EXISTS {name} ON {qualified_table};
CREATE TRIGGER {name}
AFTER INSERT OR UPDATE OR DELETE ON {qualified_table}
FOR EACH ROW EXECUTE PROCEDURE {function}('{channel}', '{notify_columns}', '{check_columns}');"#,
        name = name,
        qualified_table = qualified_table,
        function = NOTIFY_FUNCTION_NAME,
        channel = escape_sql_literal(channel),
        notify_columns = escape_sql_literal(notify_columns),
        check_columns = escape_sql_literal(check_columns),
    )
}

/// Escapes embedded single quotes for interpolation into a single-quoted SQL
/// string literal. Trigger arguments (spec.md §4.4's `notifyColumns`/
/// `checkColumns`) must be literals per Postgres's `CREATE TRIGGER` grammar,
/// not bound parameters, so any projection containing a string literal of
/// its own (e.g. spec.md §8 S1's `to_char($1.time,'YYYY-MM-DD') as time`)
/// would otherwise terminate the outer literal early and fail to parse.
fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Default load SQL (spec.md §6 "Default load SQL"): `SELECT
/// <notifyColumns>, <bigColumns> FROM <qualifiedTable>`, used when a
/// `TableSpec` doesn't override `load_sql`.
pub fn default_load_sql(qualified_table: &str, notify_columns: &str, big_columns: &str) -> String {
    if big_columns.is_empty() {
        format!("SELECT {} FROM {}", notify_columns, qualified_table)
    } else {
        format!(
            "SELECT {}, {} FROM {}",
            notify_columns, big_columns, qualified_table
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_schema_defaults_to_public() {
        assert_eq!(split_schema("students"), ("public", "students"));
        assert_eq!(split_schema("tenant_a.students"), ("tenant_a", "students"));
    }

    #[test]
    fn channel_name_normalizes_missing_schema_to_public() {
        assert_eq!(channel_name("", "students"), "pgnotify_public.students");
        assert_eq!(
            channel_name("public", "students"),
            "pgnotify_public.students"
        );
        assert_eq!(
            channel_name("tenant_a", "students"),
            "pgnotify_tenant_a.students"
        );
    }

    #[test]
    fn trigger_name_is_namespaced_per_table() {
        assert_eq!(trigger_name("students"), "notify_students_trigger");
    }

    #[test]
    fn create_trigger_sql_drops_before_creating() {
        let sql = create_trigger_sql(
            "students",
            "public.students",
            "pgnotify_public.students",
            "$1.id, $1.name",
            "$1.id, $1.name",
        );
        assert!(sql.starts_with("DROP TRIGGER IF EXISTS notify_students_trigger"));
        assert!(sql.contains("CREATE TRIGGER notify_students_trigger"));
        assert!(sql.contains("AFTER INSERT OR UPDATE OR DELETE ON public.students"));
        assert!(sql.contains("notify_trigger('pgnotify_public.students', '$1.id, $1.name', '$1.id, $1.name')"));
    }

    #[test]
    fn default_load_sql_appends_big_columns_when_present() {
        assert_eq!(
            default_load_sql("public.students", "id, name", ""),
            "SELECT id, name FROM public.students"
        );
        assert_eq!(
            default_load_sql("public.students", "id, name", "bio"),
            "SELECT id, name, bio FROM public.students"
        );
    }

    #[test]
    fn notify_function_suppresses_unchanged_updates() {
        let sql = create_notify_function_sql();
        assert!(sql.contains("IF old_check = new_check THEN"));
        assert!(sql.contains("json_build_object('Action', TG_OP, 'Old', old_json, 'New', new_json)"));
    }

    #[test]
    fn notify_function_compares_check_projections_as_jsonb() {
        // `json` has no equality operator; only `jsonb` does (spec.md P2
        // depends on `old_check = new_check` actually evaluating).
        let sql = create_notify_function_sql();
        assert!(sql.contains("old_check   jsonb;"));
        assert!(sql.contains("new_check   jsonb;"));
        assert!(sql.contains("row_to_json(r)::jsonb FROM (SELECT %s FROM (SELECT ($1).*) x) r', check_cols)\n      INTO old_check"));
    }

    #[test]
    fn create_trigger_sql_escapes_embedded_single_quotes_in_projections() {
        // spec.md §8 S1's own projection embeds a string literal
        // (`to_char($1.time,'YYYY-MM-DD') as time`); unescaped, its quotes
        // would terminate the trigger-argument literal early.
        let sql = create_trigger_sql(
            "students",
            "public.students",
            "pgnotify_public.students",
            "$1.id as id, $1.name as name, to_char($1.time, 'YYYY-MM-DD') as time",
            "$1.id as id, $1.name as name",
        );
        assert!(sql.contains(
            "notify_trigger('pgnotify_public.students', '$1.id as id, $1.name as name, to_char($1.time, ''YYYY-MM-DD'') as time', '$1.id as id, $1.name as name')"
        ));
    }
}
