//! Per-task log aggregation
//!
//! Each task owns one [`LogStore`]. Records keep their emission order and are
//! attached to the task's response; when collection is disabled the response
//! carries an empty sequence. Truncation is purely presentational.

use pagepress_core::task::{LogLevel, LogRecord};

pub const TRUNCATION_MARKER: &str = "...";

pub struct LogStore {
    entries: Vec<LogRecord>,
    enabled: bool,
    max_entry_size: usize,
}

impl LogStore {
    pub fn new(enabled: bool, max_entry_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            enabled,
            max_entry_size,
        }
    }

    pub fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        self.push(level, message.into(), false);
    }

    /// Entries produced by the page itself rather than the engine.
    pub fn record_user(&mut self, level: LogLevel, message: impl Into<String>) {
        self.push(level, message.into(), true);
    }

    fn push(&mut self, level: LogLevel, message: String, user_level: bool) {
        if !self.enabled {
            return;
        }
        let message = truncate_message(message, self.max_entry_size);
        let record = if user_level {
            LogRecord::user(level, message)
        } else {
            LogRecord::new(level, message)
        };
        self.entries.push(record);
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Truncate to `max` characters plus a trailing marker. The cut is by
/// character, never through the middle of a code point.
pub(crate) fn truncate_message(message: String, max: usize) -> String {
    if message.chars().count() <= max {
        return message;
    }
    let mut truncated: String = message.chars().take(max).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
