//! Depth-first flattening of hierarchical records.
//!
//! Every leaf of the traversal becomes one [`Row`] carrying the records of
//! all its ancestors. Rendering then drops rows that repeat the previous one
//! and blanks ancestor cells already shown for the same parent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::format_value;
use crate::error::{ExportError, ExportResult};
use crate::models::{HeaderDescriptor, Record, Row, Schema, TableSpec};

/// Synthetic column holding the 1-based emitted row number.
pub const LINE_COLUMN: &str = "line";

/// Synthetic column holding the deepest table of the row.
pub const TABLE_COLUMN: &str = "table";

/// One requested output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelection {
    /// Header label, `table.attribute`, or a synthetic column name.
    pub label: String,
    /// Replacement label in the output.
    #[serde(default)]
    pub display: Option<String>,
}

impl ColumnSelection {
    /// Parse a comma-separated list of `label` or `label=Display` items.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once('=') {
                Some((label, display)) => Self {
                    label: label.trim().to_string(),
                    display: Some(display.trim().to_string()),
                },
                None => Self {
                    label: item.to_string(),
                    display: None,
                },
            })
            .collect()
    }
}

/// Export switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Follow non-composed relations too.
    #[serde(default)]
    pub include_associations: bool,
    /// Explicit columns, in output order. Unlisted attributes are hidden.
    #[serde(default)]
    pub columns: Option<Vec<ColumnSelection>>,
    /// Blank ancestor cells repeated under the same parent.
    #[serde(default = "default_collapse")]
    pub collapse: bool,
}

fn default_collapse() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_associations: false,
            columns: None,
            collapse: true,
        }
    }
}

/// Where the cells of an output column come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Attribute { table: String, attribute: String },
    Line,
    Table,
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub label: String,
    pub source: Source,
}

impl Column {
    fn is_synthetic(&self) -> bool {
        !matches!(self.source, Source::Attribute { .. })
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// Build one row per leaf of `items`, rows of the schema's root table.
pub fn flatten(schema: &Schema, items: &[Value], include_associations: bool) -> ExportResult<Vec<Row>> {
    let root = schema
        .table(&schema.root)
        .ok_or_else(|| ExportError::UnknownTable(schema.root.clone()))?;

    let mut rows = Vec::new();
    walk(schema, root, items, &Row::default(), None, include_associations, &mut rows)?;
    Ok(rows)
}

fn walk(
    schema: &Schema,
    spec: &TableSpec,
    items: &[Value],
    parent: &Row,
    prefix: Option<&str>,
    include_associations: bool,
    rows: &mut Vec<Row>,
) -> ExportResult<()> {
    let mut ordered = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_object().map(|record| (index, record)).ok_or_else(|| ExportError::NotAnObject {
                table: spec.name.clone(),
                index,
            })
        })
        .collect::<ExportResult<Vec<(usize, &Record)>>>()?;

    if let Some(sort_key) = &spec.sort_key {
        ordered.sort_by(|a, b| compare_values(a.1.get(sort_key), b.1.get(sort_key)));
    }

    for (index, record) in ordered {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{index}"),
            None => index.to_string(),
        };

        let mut row = parent.clone();
        let own: Record = record
            .iter()
            .filter(|(attribute, _)| !spec.is_relation(attribute))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        row.tables.insert(spec.name.clone(), own);
        row.paths.insert(spec.name.clone(), path.clone());
        row.leaf = spec.name.clone();

        let before = rows.len();
        for relation in &spec.children {
            if !relation.composed && !include_associations {
                continue;
            }
            let child = schema
                .table(&relation.table)
                .ok_or_else(|| ExportError::UnknownTable(relation.table.clone()))?;
            if let Some(Value::Array(children)) = record.get(&relation.field) {
                let prefix = format!("{path}.{}", relation.field);
                walk(schema, child, children, &row, Some(&prefix), include_associations, rows)?;
            }
        }

        // No child emitted a row: this record is a leaf itself.
        if rows.len() == before {
            rows.push(row);
        }
    }
    Ok(())
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => {
            let x = a.map(format_value).unwrap_or_default();
            let y = b.map(format_value).unwrap_or_default();
            x.cmp(&y)
        }
    }
}

// =============================================================================
// Columns and rendering
// =============================================================================

/// Output columns for `headers`. With an explicit selection, unlisted
/// headers are marked `ignore` and listed ones take their display label.
pub fn resolve_columns(
    headers: &mut [HeaderDescriptor],
    selection: Option<&[ColumnSelection]>,
) -> ExportResult<Vec<Column>> {
    let Some(selection) = selection else {
        return Ok(headers
            .iter()
            .filter(|h| !h.ignore)
            .map(|h| Column {
                label: h.label.clone(),
                source: Source::Attribute {
                    table: h.table.clone(),
                    attribute: h.attribute.clone(),
                },
            })
            .collect());
    };

    let mut selected = vec![false; headers.len()];
    let mut columns = Vec::with_capacity(selection.len());

    for wanted in selection {
        let found = headers.iter().position(|h| {
            h.label == wanted.label || format!("{}.{}", h.table, h.attribute) == wanted.label
        });
        let label = wanted.display.clone().unwrap_or_else(|| wanted.label.clone());

        let source = match found {
            Some(index) => {
                selected[index] = true;
                let header = &mut headers[index];
                header.ignore = false;
                header.label = label.clone();
                Source::Attribute {
                    table: header.table.clone(),
                    attribute: header.attribute.clone(),
                }
            }
            None if wanted.label == LINE_COLUMN => Source::Line,
            None if wanted.label == TABLE_COLUMN => Source::Table,
            None => return Err(ExportError::UnknownColumn(wanted.label.clone())),
        };
        columns.push(Column { label, source });
    }

    for (header, keep) in headers.iter_mut().zip(selected) {
        if !keep {
            header.ignore = true;
        }
    }
    Ok(columns)
}

/// Render rows into cell strings.
pub fn render(rows: &[Row], columns: &[Column], collapse: bool) -> Vec<Vec<String>> {
    let has_attributes = columns.iter().any(|c| !c.is_synthetic());
    let mut out: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    let mut previous: Option<(&Row, Vec<String>)> = None;

    for row in rows {
        let values: Vec<String> = columns
            .iter()
            .map(|column| match &column.source {
                Source::Attribute { table, attribute } => row
                    .tables
                    .get(table)
                    .and_then(|record| record.get(attribute))
                    .map(format_value)
                    .unwrap_or_default(),
                Source::Line | Source::Table => String::new(),
            })
            .collect();

        if let Some((_, before)) = &previous {
            let repeated = columns
                .iter()
                .zip(values.iter().zip(before))
                .filter(|(column, _)| !column.is_synthetic())
                .all(|(_, (now, then))| now == then);
            if has_attributes && repeated {
                continue;
            }
        }

        let line = out.len() + 1;
        let cells = columns
            .iter()
            .zip(&values)
            .map(|(column, value)| match &column.source {
                Source::Line => line.to_string(),
                Source::Table => row.leaf.clone(),
                Source::Attribute { table, .. } => {
                    let shared = collapse
                        && *table != row.leaf
                        && previous.as_ref().is_some_and(|(prev, _)| {
                            prev.paths.contains_key(table) && prev.paths.get(table) == row.paths.get(table)
                        });
                    if shared {
                        String::new()
                    } else {
                        value.clone()
                    }
                }
            })
            .collect();

        out.push(cells);
        previous = Some((row, values));
    }
    out
}
