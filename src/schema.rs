//! A declarative description of a row's columns (spec.md §2 "Row decoder",
//! §3 "Row schema"), used only to *derive* SQL projections
//! (`notifyColumns`/`checkColumns`/load SQL) for [`crate::listener::Listener::listen_table`].
//! Decoding itself goes straight through `serde_json::from_value::<Row>`, as
//! SPEC_FULL §3 requires — this module never touches a row's bytes.
//!
//! Field-name-to-column conversion uses `Inflector`'s `to_snake_case`,
//! exactly as `mapping.rs`'s `SqlName::from(&str)` does in the teacher.

use inflector::Inflector;

/// The semantic type of a column, informational only: nothing here drives
/// decoding (`serde_json` does that against the caller's `Row` type), but it
/// documents intent and lets future SQL-template work (e.g. casting
/// timestamps) key off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInt,
    Float,
    Text,
    Boolean,
    Timestamp,
    Json,
    Record,
}

/// One column of a [`RowSchema`].
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    column_type: ColumnType,
    ignore: bool,
    big: bool,
    projection: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Field {
            name: name.into(),
            column_type,
            ignore: false,
            big: false,
            projection: None,
        }
    }

    /// Marks this field as carrying a `json:"-"`-style tag (spec.md §6):
    /// omitted from the derived `notifyColumns` entirely.
    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// Marks this field as a big column (spec.md §4.2 "Big-columns
    /// side-load"): omitted from `notifyColumns`, loaded separately.
    pub fn big(mut self) -> Self {
        self.big = true;
        self
    }

    /// Overrides the default `$1.<snake_name>` projection, e.g. for a
    /// timestamp that needs `to_char($1.time, 'YYYY-MM-DD') as time`
    /// (spec.md §8 scenario S1).
    pub fn projection(mut self, expr: impl Into<String>) -> Self {
        self.projection = Some(expr.into());
        self
    }

    pub fn column_name(&self) -> String {
        self.name.to_snake_case()
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }
}

/// An ordered set of named, typed fields (spec.md §3 "Row schema").
#[derive(Debug, Clone, Default)]
pub struct RowSchema {
    fields: Vec<Field>,
}

impl RowSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        RowSchema { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The notify-trigger projection (spec.md §4.1 "notifyColumns"):
    /// every non-ignored, non-big field, as `$1.<col> [as <col>]` or the
    /// field's custom projection expression.
    pub fn notify_columns(&self) -> String {
        self.fields
            .iter()
            .filter(|f| !f.ignore && !f.big)
            .map(|f| match &f.projection {
                Some(expr) => expr.clone(),
                None => {
                    let col = f.column_name();
                    format!("$1.{} as {}", col, col)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The bare plain-select projection used by reload/load SQL (spec.md
    /// §6 "Default load SQL"): no `$1.` prefix, no custom expressions.
    pub fn load_columns(&self) -> String {
        self.fields
            .iter()
            .filter(|f| !f.ignore && !f.big)
            .map(|f| f.column_name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The big-columns projection used by both the trigger's omission list
    /// and the side-load query.
    pub fn big_columns(&self) -> String {
        self.fields
            .iter()
            .filter(|f| f.big)
            .map(|f| f.column_name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `checkColumns` (spec.md §4.1): defaults to the same fields as
    /// `notifyColumns` when the caller doesn't narrow it explicitly via
    /// [`crate::listener::TableSpec::check_fields`].
    pub fn check_columns(&self, only: Option<&[&str]>) -> String {
        match only {
            None => self.notify_columns_bare(),
            Some(names) => self
                .fields
                .iter()
                .filter(|f| names.contains(&f.name.as_str()))
                .map(|f| {
                    let col = f.column_name();
                    format!("$1.{} as {}", col, col)
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    fn notify_columns_bare(&self) -> String {
        self.notify_columns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            Field::new("id", ColumnType::BigInt),
            Field::new("name", ColumnType::Text),
            Field::new("time", ColumnType::Timestamp)
                .projection("to_char($1.time, 'YYYY-MM-DD') as time"),
            Field::new("internal_note", ColumnType::Text).ignored(),
            Field::new("bio", ColumnType::Text).big(),
        ])
    }

    #[test]
    fn notify_columns_skips_ignored_and_big_fields() {
        assert_eq!(
            schema().notify_columns(),
            "$1.id as id, $1.name as name, to_char($1.time, 'YYYY-MM-DD') as time"
        );
    }

    #[test]
    fn load_columns_is_bare_and_skips_ignored_and_big_fields() {
        assert_eq!(schema().load_columns(), "id, name, time");
    }

    #[test]
    fn big_columns_lists_only_big_fields() {
        assert_eq!(schema().big_columns(), "bio");
    }

    #[test]
    fn check_columns_narrows_when_given_a_subset() {
        assert_eq!(
            schema().check_columns(Some(&["id", "name"])),
            "$1.id as id, $1.name as name"
        );
    }

    #[test]
    fn column_name_converts_to_snake_case() {
        let f = Field::new("className", ColumnType::Text);
        assert_eq!(f.column_name(), "class_name");
    }
}
