//! REST API types.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::error::ServerError;
use crate::import::{ImportOutcome, Phase};
use crate::models::Counters;

/// Response sent after an import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// Unique job identifier
    pub job_id: String,

    /// Status: "applied" or "aborted"
    pub status: String,

    /// Phase the import stopped in
    pub phase: Phase,

    pub counters: Counters,

    /// Charset used to decode the primary file
    pub charset: String,

    /// Structured errors
    pub errors: Diagnostics,

    /// Errors flattened into printable lines
    pub messages: Vec<String>,
}

impl ImportResponse {
    pub fn new(outcome: ImportOutcome, charset: String) -> Self {
        let status = if outcome.is_applied() { "applied" } else { "aborted" };
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: status.to_string(),
            phase: outcome.phase,
            counters: outcome.counters,
            charset,
            messages: outcome.errors.lines(),
            errors: outcome.errors,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == "applied"
    }
}

/// Query parameters of `GET /api/export`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub separator: Option<String>,
    pub charset: Option<String>,
    /// Comma-separated `label` or `label=Display` items
    pub columns: Option<String>,
    pub collapse: Option<bool>,
}

/// Create an error response
pub fn error_response(message: &str) -> Value {
    json!({
        "status": "error",
        "error": message
    })
}

/// Map a server error to an HTTP rejection.
pub fn reject(err: ServerError) -> (StatusCode, Json<Value>) {
    let status = match err {
        ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServerError::Exchange(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error_response(&err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_response_lists_messages() {
        let mut errors = Diagnostics::new();
        errors.add_global("Operation aborted");
        let outcome = ImportOutcome {
            phase: Phase::Aborted,
            counters: Counters::default(),
            errors,
        };

        let response = ImportResponse::new(outcome, "utf-8".to_string());
        assert!(!response.is_applied());
        assert_eq!(response.messages, vec!["Operation aborted"]);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["phase"], "aborted");
        assert_eq!(json["counters"]["rowAdded"], 0);
    }

    #[test]
    fn test_reject_status() {
        let (status, body) = reject(ServerError::BadRequest("No file provided".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["error"], "Invalid request: No file provided");
    }
}
