//! Export path: hierarchical records to denormalized CSV.
//!
//! ```text
//! items ──▶ HeaderRegistry ──▶ flatten ──▶ render (collapse) ──▶ serialize
//! ```

pub mod flatten;
pub mod serialize;

use serde_json::Value;

pub use flatten::{
    flatten, render, resolve_columns, Column, ColumnSelection, ExportOptions, Source, LINE_COLUMN,
    TABLE_COLUMN,
};
pub use serialize::{encode_output, escape_field, is_plain_number, to_text};

use crate::api::logs::log_success;
use crate::error::ExportResult;
use crate::header::HeaderRegistry;
use crate::models::{Document, Schema};

/// Render one attribute value as CSV cell text.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Flatten `items` (rows of the schema's root table) and return the CSV
/// text, without byte-order mark.
///
/// `doc.headers` keeps the registered columns, `doc.counters.row_count` the
/// number of emitted rows.
pub fn export_text(
    doc: &mut Document,
    schema: &Schema,
    items: &[Value],
    options: &ExportOptions,
) -> ExportResult<String> {
    doc.reset();

    let mut registry = HeaderRegistry::new();
    registry.register_items(schema, &schema.root, items, options.include_associations);
    doc.headers = registry.finish();

    doc.rows = flatten(schema, items, options.include_associations)?;
    let columns = resolve_columns(&mut doc.headers, options.columns.as_deref())?;
    let cells = render(&doc.rows, &columns, options.collapse);

    let labels: Vec<String> = columns.into_iter().map(|c| c.label).collect();
    let text = to_text(&labels, &cells, doc.separator);

    doc.counters.row_count = cells.len();
    doc.clear_transient();
    Ok(text)
}

/// Export into `doc.output`, encoded in the document's charset.
pub fn export_document(
    doc: &mut Document,
    schema: &Schema,
    items: &[Value],
    options: &ExportOptions,
) -> ExportResult<Vec<u8>> {
    let text = export_text(doc, schema, items, options)?;
    let bytes = encode_output(&text, &doc.charset, doc.is_utf8())?;

    log_success(format!(
        "Exported {} row(s) to '{}' ({} bytes, {})",
        doc.counters.row_count,
        doc.name,
        bytes.len(),
        doc.charset
    ));
    doc.output = Some(bytes.clone());
    Ok(bytes)
}
