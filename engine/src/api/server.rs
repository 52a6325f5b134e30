//! HTTP server exposing the exchange engine over one in-memory list.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                          |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/health`         | Health check                         |
//! | POST   | `/api/import`     | Import CSV file(s) into the list     |
//! | GET    | `/api/export`     | Export the list as CSV               |
//! | GET    | `/api/logs`       | SSE stream for real-time logs        |

use axum::{
    extract::{Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event as SseEvent, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_info, log_phase, LogLevel, LOG_BROADCASTER};
use super::types::{reject, ExportQuery, ImportResponse};
use crate::config::{parse_separator, ExchangeConfig};
use crate::error::{ExchangeError, ServerError};
use crate::export::{export_document, ColumnSelection, ExportOptions};
use crate::import::{run_import, ImportOptions};
use crate::models::{Document, FileDescriptor, DEFAULT_CHARSET};
use crate::parser::{decode_content, detect_delimiter, AUTO_CHARSET};
use crate::progress::Event;
use crate::repository::MemoryList;

type Rejection = (StatusCode, Json<Value>);

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ExchangeConfig>,
    pub list: Arc<Mutex<MemoryList>>,
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/import", post(import_csv))
        .route("/api/export", get(export_csv))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: ExchangeConfig, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let list = MemoryList::open(&config.store, config.table_spec())?;
    log_info(format!(
        "Store {} ({} rows, table '{}')",
        config.store.display(),
        list.len(),
        list.spec().name
    ));

    let state = AppState {
        config: Arc::new(config),
        list: Arc::new(Mutex::new(list)),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 csvx server running on http://localhost:{}", port);
    println!("   POST /api/import - Import CSV file(s)");
    println!("   GET  /api/export - Export CSV");
    println!("   GET  /api/logs   - SSE log stream");
    println!("   GET  /health     - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "csvx",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "import": "POST /api/import",
            "export": "GET /api/export",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(SseEvent::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes" | "on")
}

fn bad_request(message: String) -> Rejection {
    reject(ServerError::BadRequest(message))
}

/// Import endpoint.
///
/// Multipart fields: one or more `file` parts (the first is the primary
/// file), optional `delete`, `skipCheck`, `skipImport`, `separator`
/// (`auto` detects it) and `charset` (`auto` detects it).
async fn import_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportResponse>), Rejection> {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut options = ImportOptions::default();
    let mut separator: Option<String> = None;
    let mut charset = state.config.charset.clone();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let file_name = field
                .file_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("file{}.csv", files.len() + 1));
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("Read error: {}", e)))?;
            files.push((file_name, bytes.to_vec()));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| bad_request(format!("Read error: {}", e)))?;
        match name.as_str() {
            "delete" => options.delete_missing = flag(&text),
            "skipCheck" => options.skip_check = flag(&text),
            "skipImport" => options.skip_import = flag(&text),
            "separator" => separator = Some(text),
            "charset" => charset = text,
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(bad_request("No file provided".to_string()));
    }

    let mut decoded = Vec::with_capacity(files.len());
    let mut used_charset = String::new();
    for (index, (file_name, bytes)) in files.into_iter().enumerate() {
        let (text, used) = decode_content(&bytes, &charset)
            .map_err(|e| reject(ServerError::Exchange(ExchangeError::Csv(e))))?;
        if index == 0 {
            used_charset = used;
        }
        decoded.push(FileDescriptor::new(file_name, text));
    }

    let primary = decoded.remove(0);
    let separator = match separator.as_deref().map(str::trim) {
        None | Some("") => state.config.separator,
        Some("auto") => detect_delimiter(&primary.content),
        Some(value) => parse_separator(value)
            .ok_or_else(|| bad_request(format!("Invalid separator: {value:?}")))?,
    };

    log_info(format!(
        "📄 Import {} ({} bytes, {} extra file(s))",
        primary.name,
        primary.content.len(),
        decoded.len()
    ));

    let doc = Document::new(primary.name)
        .with_content(primary.content)
        .with_separator(separator)
        .with_charset(used_charset.clone());

    let mut list = state.list.lock().await;
    let outcome = run_import(doc, decoded, &mut *list, options, &state.config.pacing, |event| match event {
        Event::Busy => log_info("Import still running..."),
        Event::Progress(p) if p.current == 0 => log_phase(LogLevel::Info, p.phase, p.message),
        Event::Progress(_) => {}
    })
    .await;

    let response = ImportResponse::new(outcome, used_charset);
    let status = if response.is_applied() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

/// Export endpoint.
async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, Rejection> {
    let separator = match query.separator.as_deref() {
        None => state.config.separator,
        Some(value) => parse_separator(value)
            .ok_or_else(|| bad_request(format!("Invalid separator: {value:?}")))?,
    };
    let charset = match query.charset.as_deref() {
        Some(c) if !c.eq_ignore_ascii_case(AUTO_CHARSET) => c.to_string(),
        Some(_) => DEFAULT_CHARSET.to_string(),
        None if state.config.charset.eq_ignore_ascii_case(AUTO_CHARSET) => DEFAULT_CHARSET.to_string(),
        None => state.config.charset.clone(),
    };
    let options = ExportOptions {
        include_associations: false,
        columns: query.columns.as_deref().map(ColumnSelection::parse_list),
        collapse: query.collapse.unwrap_or(true),
    };

    let list = state.list.lock().await;
    let file_name = format!("{}.csv", list.spec().name);
    let mut doc = Document::new(file_name.clone())
        .with_separator(separator)
        .with_charset(charset.clone());

    let bytes = export_document(&mut doc, &list.schema(), &list.items(), &options)
        .map_err(|e| reject(ServerError::Exchange(ExchangeError::Export(e))))?;

    let headers = [
        (header::CONTENT_TYPE, format!("text/csv; charset={charset}")),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
    ];
    Ok((headers, bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag() {
        assert!(flag("true"));
        assert!(flag(" 1 "));
        assert!(!flag("false"));
        assert!(!flag(""));
    }
}
