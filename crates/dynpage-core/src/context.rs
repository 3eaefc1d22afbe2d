//! Per-request execution context and store management.
//!
//! This module provides:
//! - [`ScriptRequest`] and [`ScriptResponse`]: the two named bindings
//!   injected into an instance before each execution
//! - [`PageContext`]: store data holding the bindings, accessible from
//!   host functions
//! - [`LogEntry`] and [`LogLevel`]: structured logging from guest scripts

use std::time::Instant;

use wasmtime::Store;

use crate::ScriptEngine;

/// The inbound request binding visible to a script.
///
/// Instance-scoped: it lives exactly as long as one execution and is fully
/// overwritten by the next [`PageContext::rebind`].
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    /// HTTP method (GET, POST, ...).
    pub method: String,
    /// Request path.
    pub path: String,
    /// Raw query string (without the leading `?`).
    pub query: String,
    /// Request headers as key-value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body bytes.
    pub body: Vec<u8>,
}

impl ScriptRequest {
    /// Create a request binding with just method and path.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Select a request field by numeric id, as used by the `page.req_get`
    /// host function (0=method, 1=path, 2=query, 3=body).
    pub fn field(&self, selector: i32) -> Option<&[u8]> {
        match selector {
            0 => Some(self.method.as_bytes()),
            1 => Some(self.path.as_bytes()),
            2 => Some(self.query.as_bytes()),
            3 => Some(&self.body),
            _ => None,
        }
    }
}

/// The response handle binding a script writes through.
#[derive(Debug, Clone)]
pub struct ScriptResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as key-value pairs.
    pub headers: Vec<(String, String)>,
    /// Accumulated response body.
    pub body: Vec<u8>,
}

impl Default for ScriptResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl ScriptResponse {
    /// Set a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,
    /// Log message content.
    pub message: String,
    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Convert a numeric log level from guest code to [`LogLevel`].
///
/// Unknown values default to Info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Store data for one interpreter instance.
///
/// Holds the two per-request bindings plus instance-scoped bookkeeping.
/// Host functions reach this through [`wasmtime::Caller`].
pub struct PageContext {
    /// Unique request identifier for tracing. Updated on each rebind.
    pub request_id: String,

    /// Logs collected from guest code.
    pub logs: Vec<LogEntry>,

    request: ScriptRequest,
    response: ScriptResponse,
}

impl PageContext {
    /// Create a context with empty bindings (nothing bound yet).
    pub fn new() -> Self {
        Self {
            request_id: String::new(),
            logs: Vec::new(),
            request: ScriptRequest::default(),
            response: ScriptResponse::default(),
        }
    }

    /// Bind a request context for the next execution.
    ///
    /// This fully overwrites the previous request's bindings and resets the
    /// response handle, so a recycled instance never sees stale state.
    pub fn rebind(&mut self, request_id: String, request: ScriptRequest) {
        self.request_id = request_id;
        self.request = request;
        self.response = ScriptResponse::default();
        self.logs.clear();
    }

    /// The currently bound request.
    pub fn request(&self) -> &ScriptRequest {
        &self.request
    }

    /// Mutable access to the bound response handle.
    pub fn response_mut(&mut self) -> &mut ScriptResponse {
        &mut self.response
    }

    /// Take the response the script produced, leaving a fresh default.
    pub fn take_response(&mut self) -> ScriptResponse {
        std::mem::take(&mut self.response)
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new Wasmtime store with an unbound [`PageContext`].
pub fn create_store(engine: &ScriptEngine) -> Store<PageContext> {
    Store::new(engine.inner(), PageContext::new())
}
