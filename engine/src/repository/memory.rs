//! In-memory list persisted as one JSON file.
//!
//! Rows are matched on the natural key of the list's [`TableSpec`]. Rows
//! created during an import receive a temporary `tmp-<uuid>` id, rewritten to
//! a sequential id once the import has gone through (post-update). Changes
//! made during an import are rolled back when the import does not commit.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{DeleteCandidate, RecordPair, Repository};
use crate::api::logs::{log_info, log_warning};
use crate::diagnostics::Diagnostics;
use crate::error::{RepositoryError, RepositoryResult};
use crate::export::format_value;
use crate::models::{is_internal, Document, ParsedLine, Record, Schema, TableSpec};

/// Internal identifier attribute.
pub const ID_FIELD: &str = "_id";

const TMP_PREFIX: &str = "tmp-";

/// On-disk form of a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredList {
    pub table: TableSpec,
    #[serde(default = "first_id")]
    pub next_id: u64,
    #[serde(default)]
    pub rows: Vec<Record>,
    /// JSON Schema (draft 7) applied to imported records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
}

fn first_id() -> u64 {
    1
}

/// Compiled validation schema, split so that property errors can be
/// attributed to their column.
struct Validation {
    properties: HashMap<String, (Option<String>, jsonschema::Validator)>,
    record: jsonschema::Validator,
}

impl Validation {
    fn compile(schema: &Value) -> RepositoryResult<Self> {
        let mut properties = HashMap::new();
        if let Some(Value::Object(props)) = schema.get("properties") {
            for (field, sub) in props {
                let kind = sub.get("type").and_then(Value::as_str).map(str::to_string);
                let validator = jsonschema::draft7::new(sub)
                    .map_err(|e| RepositoryError::InvalidSchema(e.to_string()))?;
                properties.insert(field.clone(), (kind, validator));
            }
        }

        let mut rest = schema.clone();
        if let Some(object) = rest.as_object_mut() {
            object.remove("properties");
        }
        let record = jsonschema::draft7::new(&rest)
            .map_err(|e| RepositoryError::InvalidSchema(e.to_string()))?;

        Ok(Self { properties, record })
    }

    fn kind(&self, field: &str) -> Option<&str> {
        self.properties.get(field).and_then(|(kind, _)| kind.as_deref())
    }

    fn check(&self, record: &Record, errors: &mut Diagnostics) -> bool {
        let before = errors.count();
        for (field, value) in record {
            if let Some((_, validator)) = self.properties.get(field) {
                for error in validator.iter_errors(value) {
                    errors.add_field(field.clone(), error);
                }
            }
        }
        let instance = Value::Object(record.clone());
        for error in self.record.iter_errors(&instance) {
            errors.add_global(error);
        }
        errors.count() == before
    }
}

/// Convert cell text according to the declared JSON type.
fn coerce(text: &str, kind: Option<&str>) -> Value {
    let typed = matches!(kind, Some("integer" | "number" | "boolean"));
    if text.is_empty() && typed {
        return Value::Null;
    }
    let parsed = match kind {
        Some("integer") => text.parse::<i64>().ok().map(Value::from),
        Some("number") => text
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)),
        Some("boolean") => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(text.to_string()))
}

/// Operation-scoped state.
#[derive(Default)]
struct Pass {
    /// Supplementary columns by key, merged from preloaded files.
    preloaded: HashMap<String, Record>,
    /// Keys referenced by the current pass.
    seen: HashSet<String>,
    /// Temporary ids created during the import.
    created: Vec<String>,
    /// Rows and next id before the import started.
    snapshot: Option<(Vec<Record>, u64)>,
}

/// A single-table record store.
pub struct MemoryList {
    path: Option<PathBuf>,
    spec: TableSpec,
    next_id: u64,
    rows: Vec<Record>,
    schema_source: Option<Value>,
    validation: Option<Validation>,
    pass: Pass,
}

impl MemoryList {
    /// Create an empty list, not backed by a file.
    pub fn new(spec: TableSpec) -> Self {
        Self {
            path: None,
            spec,
            next_id: first_id(),
            rows: Vec::new(),
            schema_source: None,
            validation: None,
            pass: Pass::default(),
        }
    }

    /// Load a list from `path`, or start an empty one for `spec` when the
    /// file does not exist yet.
    pub fn open(path: impl AsRef<Path>, spec: TableSpec) -> RepositoryResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut list = Self::new(spec);
            list.path = Some(path.to_path_buf());
            return Ok(list);
        }

        let content = fs::read_to_string(path)?;
        let stored: StoredList = serde_json::from_str(&content)?;
        let mut list = Self::from_stored(stored)?;
        list.path = Some(path.to_path_buf());
        Ok(list)
    }

    pub fn from_stored(stored: StoredList) -> RepositoryResult<Self> {
        let mut list = Self::new(stored.table);
        list.next_id = stored.next_id;
        list.rows = stored.rows;
        if let Some(schema) = stored.validation {
            list = list.with_validation(schema)?;
        }
        Ok(list)
    }

    /// Validate imported records against a JSON Schema (draft 7).
    pub fn with_validation(mut self, schema: Value) -> RepositoryResult<Self> {
        self.validation = Some(Validation::compile(&schema)?);
        self.schema_source = Some(schema);
        Ok(self)
    }

    pub fn to_stored(&self) -> StoredList {
        StoredList {
            table: self.spec.clone(),
            next_id: self.next_id,
            rows: self.rows.clone(),
            validation: self.schema_source.clone(),
        }
    }

    /// Write the list to its file, if it has one.
    pub fn save(&self) -> RepositoryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(&self.to_stored())?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Single-table schema describing this list.
    pub fn schema(&self) -> Schema {
        Schema {
            root: self.spec.name.clone(),
            tables: vec![self.spec.clone()],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Rows as JSON items, ready for export.
    pub fn items(&self) -> Vec<Value> {
        self.rows.iter().cloned().map(Value::Object).collect()
    }

    /// Insert a row directly, assigning it the next id.
    pub fn insert(&mut self, mut record: Record) -> String {
        let id = self.allocate_id();
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        self.rows.push(record);
        id
    }

    /// Find a row by natural key value.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.position_by_key(key).map(|i| &self.rows[i])
    }

    fn allocate_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    fn key_of(&self, record: &Record) -> Option<String> {
        let key = self.spec.key.as_deref()?;
        record.get(key).map(format_value).filter(|v| !v.is_empty())
    }

    fn position_by_key(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|row| self.key_of(row).as_deref() == Some(key))
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(ID_FIELD).and_then(Value::as_str) == Some(id))
    }

    /// Build a record from the visible columns of `line`, in file order.
    fn record_of(&self, doc: &Document, line: &ParsedLine) -> Record {
        let mut record = Record::new();
        let Some(file) = doc.files.iter().find(|f| f.name == line.file) else {
            return record;
        };

        for (index, name) in file.headers.iter().enumerate() {
            if is_internal(name) || file.headers_by_name.get(name) != Some(&index) {
                continue;
            }
            let Some(text) = line.columns_by_order.get(index) else {
                continue;
            };
            let kind = self.validation.as_ref().and_then(|v| v.kind(name));
            record.insert(name.clone(), coerce(text, kind));
        }
        record
    }

    fn validate(&self, record: &Record, errors: &mut Diagnostics) -> bool {
        match &self.validation {
            Some(validation) => validation.check(record, errors),
            None => true,
        }
    }

    fn missing_key(&self, doc: &Document, errors: &mut Diagnostics) -> bool {
        let (Some(key), Some(file)) = (self.spec.key.as_deref(), doc.current()) else {
            return false;
        };
        if file.headers_by_name.contains_key(key) {
            return false;
        }
        errors.add_global(format!("{} in '{}'", RepositoryError::MissingKey(key.to_string()), file.name));
        true
    }
}

impl Repository for MemoryList {
    fn start(&mut self, doc: &Document, _errors: &mut Diagnostics) -> bool {
        self.pass = Pass::default();
        log_info(format!("Importing '{}' into list '{}' ({} rows)", doc.name, self.spec.name, self.rows.len()));
        true
    }

    fn start_preloading(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        !self.missing_key(doc, errors)
    }

    fn preload_record(&mut self, doc: &Document, line: &ParsedLine, _errors: &mut Diagnostics) -> bool {
        // The primary file is read again by the later passes.
        if doc.current_file == 0 {
            return true;
        }
        let record = self.record_of(doc, line);
        if let Some(key) = self.key_of(&record) {
            let merged = self.pass.preloaded.entry(key).or_default();
            for (k, v) in record {
                merged.entry(k).or_insert(v);
            }
        }
        true
    }

    fn start_checking(&mut self, doc: &Document, errors: &mut Diagnostics) -> bool {
        self.pass.seen.clear();
        !self.missing_key(doc, errors)
    }

    fn check_record(&mut self, doc: &Document, line: &ParsedLine, errors: &mut Diagnostics) -> bool {
        let record = self.record_of(doc, line);
        if let Some(key) = self.spec.key.as_deref() {
            if self.key_of(&record).is_none() {
                errors.add_field(key, "required");
                return false;
            }
        }
        self.validate(&record, errors)
    }

    fn record_from_line(&mut self, doc: &Document, line: &ParsedLine, _errors: &mut Diagnostics) -> Option<RecordPair> {
        let mut new = self.record_of(doc, line);
        let Some(key) = self.key_of(&new) else {
            // Without a natural key every line is a new row.
            return Some(RecordPair { id: None, old: None, new: Some(new) });
        };

        if let Some(extra) = self.pass.preloaded.get(&key) {
            for (k, v) in extra {
                new.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        self.pass.seen.insert(key.clone());
        let old = self.position_by_key(&key).map(|i| self.rows[i].clone());
        let id = old
            .as_ref()
            .and_then(|r| r.get(ID_FIELD))
            .map(format_value);
        Some(RecordPair { id, old, new: Some(new) })
    }

    fn rows_to_delete(&mut self, _doc: &Document) -> usize {
        self.rows
            .iter()
            .filter(|row| self.key_of(row).is_some_and(|k| !self.pass.seen.contains(&k)))
            .count()
    }

    fn start_importing(&mut self, _doc: &Document, _errors: &mut Diagnostics) -> bool {
        self.pass.seen.clear();
        self.pass.created.clear();
        self.pass.snapshot = Some((self.rows.clone(), self.next_id));
        true
    }

    fn add_item(&mut self, _doc: &Document, record: &Record, errors: &mut Diagnostics) -> bool {
        if !self.validate(record, errors) {
            return false;
        }
        let id = format!("{TMP_PREFIX}{}", uuid::Uuid::new_v4());
        let mut row = record.clone();
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        self.rows.push(row);
        self.pass.created.push(id);
        true
    }

    fn update_item(&mut self, _doc: &Document, id: &str, _old: &Record, new: &Record, errors: &mut Diagnostics) -> bool {
        if !self.validate(new, errors) {
            return false;
        }
        let Some(index) = self.position_by_id(id) else {
            errors.add_global(RepositoryError::NotFound(id.to_string()));
            return false;
        };
        let row = &mut self.rows[index];
        for (k, v) in new {
            row.insert(k.clone(), v.clone());
        }
        true
    }

    fn items_to_delete(&mut self, _doc: &Document, _errors: &mut Diagnostics) -> Vec<DeleteCandidate> {
        self.rows
            .iter()
            .filter(|row| self.key_of(row).is_some_and(|k| !self.pass.seen.contains(&k)))
            .filter_map(|row| {
                let id = row.get(ID_FIELD).map(format_value)?;
                Some(DeleteCandidate { id, record: row.clone() })
            })
            .collect()
    }

    fn delete_item(&mut self, _doc: &Document, id: &str, _record: &Record, errors: &mut Diagnostics) -> bool {
        match self.position_by_id(id) {
            Some(index) => {
                self.rows.remove(index);
                true
            }
            None => {
                errors.add_global(RepositoryError::NotFound(id.to_string()));
                false
            }
        }
    }

    fn items_to_post_update(&mut self, _doc: &Document, _errors: &mut Diagnostics) -> Vec<RecordPair> {
        let created = std::mem::take(&mut self.pass.created);
        let mut pairs = Vec::with_capacity(created.len());
        for tmp in created {
            let Some(index) = self.position_by_id(&tmp) else {
                continue;
            };
            let old = self.rows[index].clone();
            let mut new = old.clone();
            new.insert(ID_FIELD.to_string(), Value::String(self.allocate_id()));
            pairs.push(RecordPair { id: Some(tmp), old: Some(old), new: Some(new) });
        }
        pairs
    }

    fn end_importing(&mut self, _doc: &Document, errors: &mut Diagnostics) -> bool {
        if let Err(err) = self.save() {
            errors.add_global(err);
            return false;
        }
        self.pass.snapshot = None;
        true
    }

    fn end(&mut self, _doc: &Document, _errors: &mut Diagnostics) {
        if let Some((rows, next_id)) = self.pass.snapshot.take() {
            log_warning(format!("Rolling back list '{}'", self.spec.name));
            self.rows = rows;
            self.next_id = next_id;
        }
        self.pass = Pass::default();
    }
}
