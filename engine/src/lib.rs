//! # csvx - CSV exchange engine
//!
//! Flattens hierarchical records into denormalized CSV and imports CSV files
//! back into a record store through a phased, fault-isolating protocol.
//!
//! ## Architecture
//!
//! ```text
//! Export
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Records   │────▶│   Headers   │────▶│  Flatten /  │────▶│  CSV text   │
//! │  (nested)   │     │  Registry   │     │  Collapse   │     │ (BOM, ';')  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!
//! Import
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  CSV files  │────▶│  Preloader  │────▶│  Tokenizer  │────▶│ Orchestrator│──▶ Repository
//! │ (primary +) │     │  (headers)  │     │  (per line) │     │  (phases)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csvx::{Document, ImportJob, ImportOptions, MemoryList, TableSpec};
//!
//! let mut spec = TableSpec::new("people");
//! spec.key = Some("Name".into());
//! let mut list = MemoryList::new(spec);
//!
//! let doc = Document::new("people.csv").with_content("Name;Age\nAnn;30\n");
//! let outcome = ImportJob::new(doc, vec![], &mut list, ImportOptions::default()).finish();
//! assert!(outcome.is_applied());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Typed error hierarchy
//! - [`diagnostics`] - Fatal / global / field error aggregation
//! - [`models`] - Document, descriptors, schema
//! - [`parser`] - Tokenizer and charset handling
//! - [`header`] - Header registry
//! - [`export`] - Flatten, collapse and serialize
//! - [`import`] - Multi-file preloader and phase orchestrator
//! - [`progress`] - Cooperative progress driver
//! - [`repository`] - Repository trait and in-memory list
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server and log streaming

// Core modules
pub mod error;
pub mod diagnostics;
pub mod models;

// Parsing
pub mod parser;
pub mod header;

// Exchange
pub mod export;
pub mod import;
pub mod progress;

// Storage
pub mod repository;

// Configuration
pub mod config;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CsvError, CsvResult, ExchangeError, ExchangeResult, ExportError, ExportResult, RepositoryError,
    RepositoryResult, ServerError,
};

pub use diagnostics::{Diagnostic, Diagnostics, Severity};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    Counters, Document, FileDescriptor, HeaderDescriptor, ParsedLine, Record, Relation, Row, Schema,
    TableSpec,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{decode_content, detect_delimiter, detect_encoding, encode_content, split_line, Tokenizer};

pub use header::{scan_headers, HeaderRegistry};

// =============================================================================
// Re-exports - Export / Import
// =============================================================================

pub use export::{export_document, export_text, format_value, ColumnSelection, ExportOptions};

pub use import::{run_import, ImportJob, ImportOptions, ImportOutcome, Phase, Progress};

pub use progress::{drive, Event, Pacing};

// =============================================================================
// Re-exports - Repository
// =============================================================================

pub use repository::{Change, DeleteCandidate, MemoryList, RecordPair, Repository};

pub use config::ExchangeConfig;

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
