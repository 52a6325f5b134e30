//! Error aggregation for import and export operations.
//!
//! A [`Diagnostics`] collects three kinds of entries:
//!
//! - **fatal**: stops the current phase and the whole operation
//! - **global**: concerns the whole operation (missing file, duplicate header)
//! - **field**: attached to one attribute of one record
//!
//! Line-scoped errors are gathered in their own `Diagnostics` and nested
//! under a `"<file>: line <n>"` label once the line has been processed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a collected error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Global,
    Field { field: String },
}

/// A single collected error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(flatten)]
    pub severity: Severity,
    pub message: String,
}

/// Aggregated errors, optionally labelled and nested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Diagnostics>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty, labelled collection.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn add_fatal(&mut self, message: impl fmt::Display) {
        self.push(Severity::Fatal, message);
    }

    pub fn add_global(&mut self, message: impl fmt::Display) {
        self.push(Severity::Global, message);
    }

    pub fn add_field(&mut self, field: impl Into<String>, message: impl fmt::Display) {
        self.push(Severity::Field { field: field.into() }, message);
    }

    fn push(&mut self, severity: Severity, message: impl fmt::Display) {
        self.entries.push(Diagnostic {
            severity,
            message: message.to_string(),
        });
    }

    /// Nest `child` under `label`. Empty children are dropped.
    pub fn nest(&mut self, label: impl Into<String>, mut child: Diagnostics) {
        if !child.has_error() {
            return;
        }
        child.label = Some(label.into());
        self.children.push(child);
    }

    /// True when any entry exists here or in a nested collection.
    pub fn has_error(&self) -> bool {
        !self.entries.is_empty() || self.children.iter().any(Diagnostics::has_error)
    }

    /// True when a fatal entry exists here or in a nested collection.
    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Fatal)
            || self.children.iter().any(Diagnostics::has_fatal)
    }

    /// Total number of entries, nested ones included.
    pub fn count(&self) -> usize {
        self.entries.len() + self.children.iter().map(Diagnostics::count).sum::<usize>()
    }

    /// Flatten into printable lines, prefixing nested entries with their labels.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_lines(None, &mut out);
        out
    }

    fn collect_lines(&self, prefix: Option<&str>, out: &mut Vec<String>) {
        let here = match (prefix, self.label.as_deref()) {
            (Some(p), Some(l)) => Some(format!("{p} > {l}")),
            (None, Some(l)) => Some(l.to_string()),
            (Some(p), None) => Some(p.to_string()),
            (None, None) => None,
        };

        for entry in &self.entries {
            let text = match &entry.severity {
                Severity::Field { field } => format!("{field}: {}", entry.message),
                _ => entry.message.clone(),
            };
            match &here {
                Some(h) => out.push(format!("{h}: {text}")),
                None => out.push(text),
            }
        }

        for child in &self.children {
            child.collect_lines(here.as_deref(), out);
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Label used for line-scoped errors.
pub fn line_label(file: &str, line: usize) -> String {
    format!("{file}: line {line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_error() {
        let d = Diagnostics::new();
        assert!(!d.has_error());
        assert!(!d.has_fatal());
        assert_eq!(d.count(), 0);
    }

    #[test]
    fn test_nested_fatal_is_visible() {
        let mut line = Diagnostics::new();
        line.add_fatal("broken");

        let mut all = Diagnostics::new();
        all.nest(line_label("a.csv", 4), line);

        assert!(all.has_error());
        assert!(all.has_fatal());
        assert_eq!(all.lines(), vec!["a.csv: line 4: broken"]);
    }

    #[test]
    fn test_nest_drops_empty_child() {
        let mut all = Diagnostics::new();
        all.nest("a.csv: line 2", Diagnostics::new());
        assert!(all.children.is_empty());
    }

    #[test]
    fn test_field_lines() {
        let mut line = Diagnostics::new();
        line.add_field("price", "must be a number");
        let mut all = Diagnostics::new();
        all.add_global("Duplicate column 'x' in 'a.csv'");
        all.nest("a.csv: line 3", line);

        assert_eq!(all.count(), 2);
        assert!(!all.has_fatal());
        let lines = all.lines();
        assert_eq!(lines[0], "Duplicate column 'x' in 'a.csv'");
        assert_eq!(lines[1], "a.csv: line 3: price: must be a number");
    }

    #[test]
    fn test_serialize_shape() {
        let mut d = Diagnostics::new();
        d.add_field("code", "required");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["entries"][0]["kind"], "field");
        assert_eq!(json["entries"][0]["field"], "code");
        assert_eq!(json["entries"][0]["message"], "required");
    }
}
