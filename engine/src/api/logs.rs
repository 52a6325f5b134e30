//! Operation logs with real-time streaming via Server-Sent Events (SSE).
//!
//! Every entry is echoed to stderr (stdout carries CSV output in the CLI)
//! and broadcast to SSE subscribers. Import entries carry the phase they
//! were emitted in; per-line entries also carry their `"<file>: line <n>"`
//! scope so a client can group them under the offending line.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::import::Phase;

/// Subscribers lagging further behind than this lose the oldest entries.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn marker(self) -> &'static str {
        match self {
            LogLevel::Info => " ",
            LogLevel::Success => "✓",
            LogLevel::Warning => "⚠️",
            LogLevel::Error => "❌",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Line or item the entry is about, e.g. `people.csv: line 4`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            phase: None,
            scope: None,
        }
    }

    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Single-line rendering used on stderr.
    pub fn render(&self) -> String {
        let mut out = String::from("   ");
        if self.scope.is_some() {
            out.push_str("   ");
        }
        out.push_str(self.level.marker());
        out.push(' ');
        if let Some(phase) = self.phase {
            out.push_str(&format!("[{}] ", phase.name()));
        }
        if let Some(scope) = &self.scope {
            out.push_str(scope);
            out.push_str(": ");
        }
        out.push_str(&self.message);
        out
    }
}

/// Global log broadcaster
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Fans log entries out to stderr and every SSE client.
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn log(&self, entry: LogEntry) {
        eprintln!("{}", entry.render());
        // No receivers is fine
        let _ = self.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub fn log_info(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Info, msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Success, msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Warning, msg));
}

/// Log an import phase boundary or summary.
pub fn log_phase(level: LogLevel, phase: Phase, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(level, msg).in_phase(phase));
}

/// Log an error attached to one line or item of an import.
pub fn log_line_error(phase: Phase, scope: impl Into<String>, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Error, msg).in_phase(phase).scoped(scope));
}
