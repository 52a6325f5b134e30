//! The record store an import talks to.
//!
//! The orchestrator never touches persisted records itself: it hands parsed
//! lines to a [`Repository`] and applies the `{old, new}` pairs the
//! repository materializes. Hooks are listed in the order they are called.
//!
//! `start*` / `end*` hooks return `false` to refuse; when they do so without
//! recording a specific error the engine adds a generic "operation aborted"
//! error itself.

pub mod memory;

use serde::Serialize;

use crate::diagnostics::Diagnostics;
use crate::models::{is_internal, Document, ParsedLine, Record};

pub use memory::MemoryList;

/// Existing and incoming state of one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordPair {
    /// Identifier of the existing record, when there is one.
    pub id: Option<String>,
    pub old: Option<Record>,
    pub new: Option<Record>,
}

/// What applying a pair would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Add,
    Update,
    Unchanged,
    /// Neither add nor update could be derived (e.g. old present, new absent).
    Skip,
}

impl RecordPair {
    pub fn classify(&self) -> Change {
        match (&self.old, &self.new) {
            (None, Some(_)) => Change::Add,
            (Some(old), Some(new)) if !records_equal(old, new) => Change::Update,
            (Some(_), Some(_)) => Change::Unchanged,
            _ => Change::Skip,
        }
    }
}

/// A record selected for deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteCandidate {
    pub id: String,
    pub record: Record,
}

/// Value equality over the non-internal attributes of `new`.
///
/// Values are compared through their CSV rendering so that `"30"` read from
/// a file equals a stored `30`.
pub fn records_equal(old: &Record, new: &Record) -> bool {
    new.iter()
        .filter(|(k, _)| !is_internal(k))
        .all(|(k, v)| {
            let current = old.get(k).map(crate::export::format_value).unwrap_or_default();
            current == crate::export::format_value(v)
        })
}

/// Hooks invoked by the import orchestrator.
#[allow(unused_variables)]
pub trait Repository {
    fn start(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    /// Called once per file before its lines are preloaded;
    /// `doc.current()` is that file.
    fn start_preloading(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    fn preload_record(&mut self, doc: &Document, line: &ParsedLine, errors: &mut Diagnostics) -> bool {
        true
    }

    fn end_preloading(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    fn start_checking(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    fn check_record(&mut self, doc: &Document, line: &ParsedLine, errors: &mut Diagnostics) -> bool {
        true
    }

    /// Materialize the existing and incoming record for one line.
    fn record_from_line(
        &mut self,
        doc: &Document,
        line: &ParsedLine,
        errors: &mut Diagnostics,
    ) -> Option<RecordPair>;

    fn end_checking(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    /// Number of existing rows the imported file does not reference.
    fn rows_to_delete(&mut self, doc: &Document) -> usize {
        0
    }

    fn start_importing(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    fn add_item(&mut self, doc: &Document, record: &Record, errors: &mut Diagnostics) -> bool;

    fn update_item(
        &mut self,
        doc: &Document,
        id: &str,
        old: &Record,
        new: &Record,
        errors: &mut Diagnostics,
    ) -> bool;

    fn items_to_delete(&mut self, doc: &Document, errors: &mut Diagnostics) -> Vec<DeleteCandidate> {
        Vec::new()
    }

    fn delete_item(&mut self, doc: &Document, id: &str, record: &Record, errors: &mut Diagnostics) -> bool {
        false
    }

    /// Pairs whose keys must be rewritten now that real identifiers exist.
    fn items_to_post_update(&mut self, doc: &Document, errors: &mut Diagnostics) -> Vec<RecordPair> {
        Vec::new()
    }

    fn end_importing(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        true
    }

    /// Always called exactly once, on every path.
    fn end(&mut self, doc: &Document, errors: &mut Diagnostics) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_classify() {
        let old = record(json!({ "_id": "1", "name": "Ann", "age": 30 }));
        let same = record(json!({ "name": "Ann", "age": "30" }));
        let changed = record(json!({ "name": "Ann", "age": "31" }));

        let add = RecordPair { id: None, old: None, new: Some(same.clone()) };
        assert_eq!(add.classify(), Change::Add);

        let update = RecordPair { id: Some("1".into()), old: Some(old.clone()), new: Some(changed) };
        assert_eq!(update.classify(), Change::Update);

        let noop = RecordPair { id: Some("1".into()), old: Some(old.clone()), new: Some(same) };
        assert_eq!(noop.classify(), Change::Unchanged);

        let broken = RecordPair { id: Some("1".into()), old: Some(old), new: None };
        assert_eq!(broken.classify(), Change::Skip);
    }

    #[test]
    fn test_equality_ignores_internal_fields() {
        let old = record(json!({ "_id": "1", "name": "Ann" }));
        let new = record(json!({ "_id": "tmp", "name": "Ann" }));
        assert!(records_equal(&old, &new));
    }
}
