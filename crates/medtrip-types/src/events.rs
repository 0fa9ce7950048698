use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{Record, to_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change published by the gateway after a successful mutation.
/// Consumers treat it as a "something changed" signal, not a diff to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// The row after the change (the deleted row for deletes).
    pub record: Record,
    /// The row before the change, when the gateway knows it.
    pub old_record: Option<Record>,
}

impl ChangeEvent {
    /// Returns the value of `column` in the new row, falling back to the old row.
    pub fn column(&self, column: &str) -> Option<&Value> {
        self.record
            .get(column)
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get(column)))
    }
}

/// Subscription scope: one table, optionally narrowed by a single column equality.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: String,
    pub column: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            column: None,
        }
    }

    pub fn eq<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.column = Some((column.to_string(), to_value(value)));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        match &self.column {
            None => true,
            Some((column, expected)) => event.column(column) == Some(expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(table: &str, conversation: &str) -> ChangeEvent {
        let mut record = Record::new();
        record.insert("conversation_id".into(), json!(conversation));
        ChangeEvent {
            table: table.into(),
            kind: ChangeKind::Insert,
            record,
            old_record: None,
        }
    }

    #[test]
    fn filter_scopes_by_table_and_column() {
        let filter = ChangeFilter::table("messages").eq("conversation_id", "conv-1");
        assert!(filter.matches(&event("messages", "conv-1")));
        assert!(!filter.matches(&event("messages", "conv-2")));
        assert!(!filter.matches(&event("typing_status", "conv-1")));
        assert!(ChangeFilter::table("messages").matches(&event("messages", "conv-2")));
    }

    #[test]
    fn delete_matches_on_old_record() {
        let filter = ChangeFilter::table("messages").eq("conversation_id", "conv-1");
        let mut ev = event("messages", "ignored");
        ev.record.clear();
        ev.kind = ChangeKind::Delete;
        let mut old = Record::new();
        old.insert("conversation_id".into(), json!("conv-1"));
        ev.old_record = Some(old);
        assert!(filter.matches(&ev));
    }
}
