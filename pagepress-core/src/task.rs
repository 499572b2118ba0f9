//! Conversion task data model
//!
//! These types travel across the process boundary, so everything here is
//! serde-derived and versioned through the IPC envelope rather than the types
//! themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// JavaScript variable a page sets to signal it finished its own work.
pub const DEFAULT_WAIT_FOR_JS_VAR: &str = "PAGEPRESS_READY";

/// Rendering collaborator selection.
///
/// Converters are statically registered in the worker; this enum is the only
/// way to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    /// Headless Chromium `--print-to-pdf` engine.
    Chromium,
    /// Deterministic markup engine used by the test suite and local development.
    Markup,
}

impl ConverterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConverterKind::Chromium => "chromium",
            ConverterKind::Markup => "markup",
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConverterKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chromium" => Ok(ConverterKind::Chromium),
            "markup" => Ok(ConverterKind::Markup),
            other => Err(format!("unknown converter kind '{}'", other)),
        }
    }
}

/// Print options forwarded to the rendering collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfOptions {
    pub margins_type: u8,
    pub page_size: String,
    pub print_background: bool,
    pub landscape: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            margins_type: 0,
            page_size: "A4".to_string(),
            print_background: false,
            landscape: false,
        }
    }
}

/// Settings for a single conversion task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionSettings {
    /// Inline HTML document; mutually optional with `url`.
    pub html: Option<String>,
    /// Page URL to load instead of inline HTML.
    pub url: Option<String>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub pdf: PdfOptions,
    /// Wait for the page to set `wait_for_js_var_name` before printing.
    pub wait_for_js: bool,
    pub wait_for_js_var_name: String,
    /// Extra settle delay before printing, in milliseconds.
    pub delay_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    /// Converter override; the worker's configured default applies when unset.
    pub converter: Option<ConverterKind>,
    /// Whether the response carries the task's log records; the pool default
    /// applies when unset.
    pub collect_logs: Option<bool>,
    /// Per-request timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            html: None,
            url: None,
            header: None,
            footer: None,
            pdf: PdfOptions::default(),
            wait_for_js: false,
            wait_for_js_var_name: DEFAULT_WAIT_FOR_JS_VAR.to_string(),
            delay_ms: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            converter: None,
            collect_logs: None,
            timeout_ms: None,
        }
    }
}

impl ConversionSettings {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }
}

impl From<&str> for ConversionSettings {
    fn from(html: &str) -> Self {
        Self::from_html(html)
    }
}

impl From<String> for ConversionSettings {
    fn from(html: String) -> Self {
        Self::from_html(html)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One log entry captured inside a worker while a task executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    /// Epoch milliseconds at emission time.
    pub timestamp: i64,
    /// True for entries produced by the page itself rather than the engine.
    #[serde(default, skip_serializing_if = "is_false")]
    pub user_level: bool,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
            user_level: false,
        }
    }

    pub fn user(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            user_level: true,
            ..Self::new(level, message)
        }
    }
}

/// Successful conversion payload returned by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    /// Base64-encoded document bytes.
    pub data: String,
    pub page_count: u32,
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

/// Error payload returned by a worker, forwarded to the caller unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
