//! Domain models for the exchange engine.
//!
//! - [`Document`] - operation-scoped state of one export or import
//! - [`HeaderDescriptor`] - one column of an export
//! - [`FileDescriptor`] - one source file of an import
//! - [`ParsedLine`] - one tokenized data line
//! - [`Schema`], [`TableSpec`], [`Relation`] - shape of hierarchical data
//! - [`Record`] - a flat attribute map

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// A flat record: attribute name to value.
pub type Record = Map<String, Value>;

/// Attributes starting with this prefix are internal to the store.
pub const INTERNAL_PREFIX: char = '_';

/// Whether an attribute is internal (never exported, never compared).
pub fn is_internal(attribute: &str) -> bool {
    attribute.starts_with(INTERNAL_PREFIX)
}

// =============================================================================
// Schema
// =============================================================================

/// A child collection embedded in a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Attribute holding the embedded array.
    pub field: String,
    /// Table of the child records.
    pub table: String,
    /// Owned (composed) children; `false` for mere associations.
    #[serde(default = "default_composed")]
    pub composed: bool,
}

fn default_composed() -> bool {
    true
}

/// Description of one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub name: String,
    /// Natural key column.
    #[serde(default)]
    pub key: Option<String>,
    /// Foreign key pointing back to the owning parent.
    #[serde(default)]
    pub parent_key: Option<String>,
    /// Attributes copied from the parent.
    #[serde(default)]
    pub copy_fields: Vec<String>,
    /// Attribute used as the natural sort order.
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub children: Vec<Relation>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether `attribute` is a denormalization artifact of this table.
    pub fn is_artifact(&self, attribute: &str) -> bool {
        self.parent_key.as_deref() == Some(attribute)
            || self.sort_key.as_deref() == Some(attribute)
            || self.copy_fields.iter().any(|f| f == attribute)
    }

    /// Whether `attribute` holds an embedded child collection.
    pub fn is_relation(&self, attribute: &str) -> bool {
        self.children.iter().any(|r| r.field == attribute)
    }
}

/// A set of tables with one root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub root: String,
    pub tables: Vec<TableSpec>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// A schema with a single table and no relations.
    pub fn single(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: name.clone(),
            tables: vec![TableSpec::new(name)],
        }
    }
}

// =============================================================================
// Headers and files
// =============================================================================

/// One export column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderDescriptor {
    pub table: String,
    pub attribute: String,
    pub label: String,
    /// Hidden from the output; still tracked for collapsing.
    pub ignore: bool,
}

/// One source file of an import.
#[derive(Debug, Clone, Default)]
pub struct FileDescriptor {
    pub name: String,
    pub content: String,
    /// Byte offset past the BOM and the header line.
    pub start_index: usize,
    pub size: usize,
    /// Physical line number of the first data line.
    pub first_row_offset: usize,
    pub headers: Vec<String>,
    pub headers_by_name: HashMap<String, usize>,
    pub row_count: usize,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len(),
            content,
            ..Self::default()
        }
    }
}

/// One tokenized data line, viewed by position and by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLine {
    pub file: String,
    pub line: usize,
    pub columns_by_order: Vec<String>,
    pub columns_by_name: HashMap<String, String>,
}

impl ParsedLine {
    /// Value of the column named `name`, if the file declares it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns_by_name.get(name).map(String::as_str)
    }
}

// =============================================================================
// Document
// =============================================================================

/// One export row: sparse per-table records plus the deepest table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub tables: BTreeMap<String, Record>,
    /// Traversal path of each table's record (`"0"`, `"0.lines.2"`, ...).
    /// Two rows sharing a path share that ancestor.
    pub paths: BTreeMap<String, String>,
    pub leaf: String,
}

/// Running counters of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub row_count: usize,
    pub row_number: usize,
    pub row_added: usize,
    pub row_updated: usize,
    pub row_deleted: usize,
}

/// Operation-scoped state of one export or import.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub charset: String,
    pub separator: char,
    /// Primary import buffer.
    pub content: String,
    pub headers: Vec<HeaderDescriptor>,
    pub rows: Vec<Row>,
    pub counters: Counters,
    pub will_delete_rows: bool,
    pub files: Vec<FileDescriptor>,
    /// Index into `files` of the file currently being read.
    pub current_file: usize,
    /// Last generated export.
    pub output: Option<Vec<u8>>,
}

pub const DEFAULT_CHARSET: &str = "utf-8";
pub const DEFAULT_SEPARATOR: char = ';';

impl Default for Document {
    fn default() -> Self {
        Self::new("export")
    }
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: DEFAULT_CHARSET.to_string(),
            separator: DEFAULT_SEPARATOR,
            content: String::new(),
            headers: Vec::new(),
            rows: Vec::new(),
            counters: Counters::default(),
            will_delete_rows: false,
            files: Vec::new(),
            current_file: 0,
            output: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Reset buffers and counters before an operation.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.rows.clear();
        self.files.clear();
        self.counters = Counters::default();
        self.current_file = 0;
    }

    /// Drop transient buffers once an operation is over.
    pub fn clear_transient(&mut self) {
        self.files.clear();
        self.rows.clear();
        self.current_file = 0;
    }

    /// The file currently being read, if any.
    pub fn current(&self) -> Option<&FileDescriptor> {
        self.files.get(self.current_file)
    }

    /// The primary file of an import.
    pub fn primary(&self) -> Option<&FileDescriptor> {
        self.files.first()
    }

    /// Whether the charset is a UTF-8 label.
    pub fn is_utf8(&self) -> bool {
        matches!(self.charset.to_lowercase().as_str(), "utf-8" | "utf8")
    }
}
