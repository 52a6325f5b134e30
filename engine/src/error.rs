//! Error types for the csvx exchange engine.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CsvError`] - tokenizer and file level errors
//! - [`RepositoryError`] - record store and schema errors
//! - [`ExportError`] - flatten/serialize errors
//! - [`ExchangeError`] - top-level errors returned by the CLI and API
//! - [`ServerError`] - HTTP layer errors
//!
//! Conversion is automatic via `From` implementations so `?` works across
//! error boundaries. Diagnostics collected during an import carry the
//! `Display` text of these errors.

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors raised while reading CSV content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsvError {
    /// A file was declared but has no content.
    #[error("File '{0}' has no content")]
    MissingContent(String),

    /// The file contains no header line.
    #[error("No headers found in '{0}'")]
    NoHeaders(String),

    /// The same header name appears twice in one file.
    #[error("Duplicate column '{name}' in '{file}'")]
    DuplicateHeader { file: String, name: String },

    /// A data line does not have as many fields as there are headers.
    #[error("Column count mismatch: expected {expected}, found {found}")]
    ColumnCount { expected: usize, found: usize },

    /// A quoted field runs to the end of the buffer.
    #[error("Unterminated quoted field starting on line {0}")]
    UnterminatedQuote(usize),

    /// The requested charset is not known.
    #[error("Unknown charset: {0}")]
    UnknownCharset(String),

    /// The whole operation was refused or interrupted.
    #[error("Operation aborted")]
    Aborted,
}

impl CsvError {
    /// Whether this error stops the current phase.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CsvError::UnterminatedQuote(_))
    }
}

// =============================================================================
// Repository Errors
// =============================================================================

/// Errors from a record store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A line has no value for the key column.
    #[error("Missing key column '{0}'")]
    MissingKey(String),

    /// The validation schema could not be compiled.
    #[error("Invalid validation schema: {0}")]
    InvalidSchema(String),

    /// IO error.
    #[error("Store IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while flattening or serializing an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The root table is not described by the schema.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A requested column matches no exported attribute.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// An item is not a JSON object.
    #[error("Item {index} of table '{table}' is not an object")]
    NotAnObject { table: String, index: usize },

    /// Encoding the output failed.
    #[error("Encoding error: {0}")]
    Csv(#[from] CsvError),
}

// =============================================================================
// Top-level Errors
// =============================================================================

/// Top-level errors returned by the CLI and the HTTP API.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Repository error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Export error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// The import finished with errors.
    #[error("Import aborted with {0} error(s)")]
    ImportFailed(usize),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Exchange error.
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for top-level operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
