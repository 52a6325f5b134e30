//! Column registry for both directions of the exchange.
//!
//! Export: [`HeaderRegistry`] registers one [`HeaderDescriptor`] per visible
//! attribute of every table met while walking the data, in first-seen order.
//!
//! Import: [`scan_headers`] reads the header line of one file and fills its
//! [`FileDescriptor`].

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::diagnostics::Diagnostics;
use crate::error::CsvError;
use crate::models::{is_internal, FileDescriptor, HeaderDescriptor, Record, Schema, TableSpec};
use crate::parser::{bom_len, count_rows, Tokenizer};

// =============================================================================
// Export
// =============================================================================

/// Ordered, de-duplicated export columns.
#[derive(Debug, Default)]
pub struct HeaderRegistry {
    headers: Vec<HeaderDescriptor>,
    seen: HashSet<(String, String)>,
}

impl HeaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the attributes of one record of `spec`.
    pub fn register_record(&mut self, spec: &TableSpec, record: &Record) {
        for attribute in record.keys() {
            if is_internal(attribute) || spec.is_relation(attribute) {
                continue;
            }
            let id = (spec.name.clone(), attribute.clone());
            if self.seen.contains(&id) {
                continue;
            }
            self.seen.insert(id);
            self.headers.push(HeaderDescriptor {
                table: spec.name.clone(),
                attribute: attribute.clone(),
                label: attribute.clone(),
                ignore: spec.is_artifact(attribute),
            });
        }
    }

    /// Register every record of `items` (rows of `table`) and, recursively,
    /// of their composed sub-collections.
    pub fn register_items(
        &mut self,
        schema: &Schema,
        table: &str,
        items: &[Value],
        include_associations: bool,
    ) {
        let Some(spec) = schema.table(table) else {
            return;
        };

        for item in items {
            let Some(record) = item.as_object() else {
                continue;
            };
            self.register_record(spec, record);

            for relation in &spec.children {
                if !relation.composed && !include_associations {
                    continue;
                }
                if let Some(Value::Array(children)) = record.get(&relation.field) {
                    self.register_items(schema, &relation.table, children, include_associations);
                }
            }
        }
    }

    /// Final descriptors. Labels carry a `table.` prefix only when more than
    /// one table contributes visible columns.
    pub fn finish(mut self) -> Vec<HeaderDescriptor> {
        let tables: HashSet<&str> = self
            .headers
            .iter()
            .filter(|h| !h.ignore)
            .map(|h| h.table.as_str())
            .collect();
        let prefixed = tables.len() > 1;

        if prefixed {
            for header in &mut self.headers {
                header.label = format!("{}.{}", header.table, header.attribute);
            }
        }
        self.headers
    }
}

// =============================================================================
// Import
// =============================================================================

/// Read the header line of `file`.
///
/// Missing content and duplicate names are recorded as global errors;
/// scanning of the header line always completes so that every problem of
/// every file surfaces together.
pub fn scan_headers(file: &mut FileDescriptor, separator: char, errors: &mut Diagnostics) {
    file.size = file.content.len();
    if file.content.trim().is_empty() {
        errors.add_global(CsvError::MissingContent(file.name.clone()));
        return;
    }

    let bom = bom_len(&file.content);
    let mut tokenizer = Tokenizer::at(&file.content, bom, 1, separator);

    let header = match tokenizer.next_line() {
        Some(Ok(raw)) => raw,
        Some(Err(err)) => {
            errors.add_global(err);
            return;
        }
        None => {
            errors.add_global(CsvError::NoHeaders(file.name.clone()));
            return;
        }
    };

    let mut headers = Vec::with_capacity(header.fields.len());
    let mut by_name = HashMap::with_capacity(header.fields.len());
    for (index, name) in header.fields.into_iter().enumerate() {
        let name = name.trim().to_string();
        if by_name.contains_key(&name) {
            errors.add_global(CsvError::DuplicateHeader {
                file: file.name.clone(),
                name: name.clone(),
            });
        } else {
            by_name.insert(name.clone(), index);
        }
        headers.push(name);
    }

    file.start_index = tokenizer.position();
    file.first_row_offset = tokenizer.line();
    file.row_count = count_rows(&file.content[file.start_index..]);
    file.headers = headers;
    file.headers_by_name = by_name;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_schema() -> Schema {
        serde_json::from_value(json!({
            "root": "orders",
            "tables": [
                {
                    "name": "orders",
                    "key": "number",
                    "children": [{ "field": "lines", "table": "lines" }]
                },
                { "name": "lines", "parentKey": "order", "sortKey": "position" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_register_first_seen_order() {
        let schema = order_schema();
        let items = vec![json!({
            "number": "A1",
            "_id": 7,
            "lines": [
                { "order": "A1", "position": 1, "sku": "X" },
                { "order": "A1", "position": 2, "sku": "Y", "qty": 3 }
            ],
            "customer": "Ann"
        })];

        let mut registry = HeaderRegistry::new();
        registry.register_items(&schema, "orders", &items, false);
        let headers = registry.finish();

        let labels: Vec<_> = headers.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, vec![
            "orders.number",
            "orders.customer",
            "lines.order",
            "lines.position",
            "lines.sku",
            "lines.qty",
        ]);
        let ignored: Vec<_> = headers.iter().filter(|h| h.ignore).map(|h| h.attribute.as_str()).collect();
        assert_eq!(ignored, vec!["order", "position"]);
    }

    #[test]
    fn test_single_table_has_no_prefix() {
        let schema = Schema::single("people");
        let items = vec![json!({ "name": "Ann", "age": 30 })];
        let mut registry = HeaderRegistry::new();
        registry.register_items(&schema, "people", &items, false);
        let labels: Vec<_> = registry.finish().into_iter().map(|h| h.label).collect();
        assert_eq!(labels, vec!["name", "age"]);
    }

    #[test]
    fn test_associations_skipped_unless_requested() {
        let schema: Schema = serde_json::from_value(json!({
            "root": "a",
            "tables": [
                { "name": "a", "children": [{ "field": "tags", "table": "tags", "composed": false }] },
                { "name": "tags" }
            ]
        }))
        .unwrap();
        let items = vec![json!({ "id": 1, "tags": [{ "tag": "x" }] })];

        let mut registry = HeaderRegistry::new();
        registry.register_items(&schema, "a", &items, false);
        assert_eq!(registry.finish().len(), 1);

        let mut registry = HeaderRegistry::new();
        registry.register_items(&schema, "a", &items, true);
        assert_eq!(registry.finish().len(), 2);
    }

    #[test]
    fn test_scan_headers() {
        let mut file = FileDescriptor::new("people.csv", "Name;Age\n\"Ann\";30\n\"Bob\";25\n");
        let mut errors = Diagnostics::new();
        scan_headers(&mut file, ';', &mut errors);

        assert!(!errors.has_error());
        assert_eq!(file.headers, vec!["Name", "Age"]);
        assert_eq!(file.headers_by_name["Age"], 1);
        assert_eq!(file.start_index, 9);
        assert_eq!(file.first_row_offset, 2);
        assert_eq!(file.row_count, 2);
    }

    #[test]
    fn test_scan_headers_skips_bom_and_blank_lines() {
        let mut file = FileDescriptor::new("p.csv", "\u{feff}\n\nName;Age\nAnn;30");
        let mut errors = Diagnostics::new();
        scan_headers(&mut file, ';', &mut errors);
        assert_eq!(file.headers, vec!["Name", "Age"]);
        assert_eq!(file.first_row_offset, 4);
        // No terminating newline on the data line
        assert_eq!(file.row_count, 0);
    }

    #[test]
    fn test_duplicate_header_is_global_not_fatal() {
        let mut file = FileDescriptor::new("dup.csv", "a;b;a;c\n1;2;3;4\n");
        let mut errors = Diagnostics::new();
        scan_headers(&mut file, ';', &mut errors);

        assert!(errors.has_error());
        assert!(!errors.has_fatal());
        assert_eq!(file.headers.len(), 4);
        assert_eq!(file.headers_by_name["a"], 0);
        assert_eq!(errors.lines(), vec!["Duplicate column 'a' in 'dup.csv'"]);
    }

    #[test]
    fn test_missing_content() {
        let mut file = FileDescriptor::new("empty.csv", "  \n");
        let mut errors = Diagnostics::new();
        scan_headers(&mut file, ';', &mut errors);
        assert_eq!(errors.lines(), vec!["File 'empty.csv' has no content"]);
    }
}
