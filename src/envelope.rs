//! The JSON envelope carried by every notification (spec.md §3), and the
//! synthetic `reload` envelope injected once a table's subscription is
//! confirmed active. Mirrors `original_source/notifier.go`'s `Message`
//! type, widened with `Old`/`New` (the Go source keeps a single `Data`
//! field and relies on the caller's `Create`/`Update`/`Delete` split instead
//! of a combined envelope; this crate keeps the wider shape so a single
//! `serde_json::from_str` captures the whole wire contract from spec.md §3).

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Action {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Old", default)]
    pub old: Option<Value>,
    #[serde(rename = "New", default)]
    pub new: Option<Value>,
}

impl Envelope {
    /// Parses a payload received on a `pgnotify_<table>` channel.
    ///
    /// Malformed payloads are a steady-state delivery failure (spec.md §7):
    /// the caller logs and drops, relying on the next reload for recovery.
    pub fn parse(payload: &str) -> Result<Envelope, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert_envelope() {
        let env = Envelope::parse(r#"{"Action":"INSERT","New":{"id":1,"name":"李雷"}}"#).unwrap();
        assert_eq!(env.action, Action::Insert);
        assert!(env.old.is_none());
        assert_eq!(env.new.unwrap()["name"], "李雷");
    }

    #[test]
    fn parses_update_envelope_with_old_and_new() {
        let env = Envelope::parse(
            r#"{"Action":"UPDATE","Old":{"id":1,"name":"李雷"},"New":{"id":1,"name":"韩梅梅"}}"#,
        )
        .unwrap();
        assert_eq!(env.action, Action::Update);
        assert_eq!(env.old.unwrap()["name"], "李雷");
        assert_eq!(env.new.unwrap()["name"], "韩梅梅");
    }

    #[test]
    fn parses_delete_envelope() {
        let env = Envelope::parse(r#"{"Action":"DELETE","Old":{"id":1}}"#).unwrap();
        assert_eq!(env.action, Action::Delete);
        assert_eq!(env.old.unwrap()["id"], 1);
        assert!(env.new.is_none());
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(Envelope::parse("not json").is_err());
    }
}
