//! HTTP API module.
//!
//! This module provides the HTTP server, its types and the log broadcaster
//! shared by the whole engine.

pub mod server;
pub mod types;
pub mod logs;

pub use server::{router, start_server, AppState};
pub use types::*;
pub use logs::*;
