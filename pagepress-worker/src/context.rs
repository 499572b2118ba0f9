//! Per-task execution context
//!
//! Everything a converter may touch while handling one task travels through
//! this context object: the log store and the channel back to the parent.
//! There is no process-global task state.

use pagepress_core::task::{LogLevel, LogRecord};
use pagepress_ipc::Message;
use tokio::sync::mpsc;

use crate::logs::LogStore;

/// Outbound application events; drained by the serve loop that owns the pipe.
pub type EventSink = mpsc::UnboundedSender<Message>;

pub struct TaskContext {
    worker_id: String,
    window_id: u32,
    logs: LogStore,
    events: EventSink,
}

impl TaskContext {
    pub fn new(worker_id: String, window_id: u32, logs: LogStore, events: EventSink) -> Self {
        Self {
            worker_id,
            window_id,
            logs,
            events,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn window_id(&self) -> u32 {
        self.window_id
    }

    /// Engine-level log line: stored with the task and mirrored to the parent.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.logs.record(level, message.clone());
        let _ = self.events.send(Message::Log {
            worker_id: self.worker_id.clone(),
            level,
            message,
        });
    }

    /// Console output from the page itself.
    pub fn page_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.logs.record_user(level, message.clone());
        let _ = self.events.send(Message::PageLog {
            window_id: self.window_id,
            level,
            message,
        });
    }

    /// Script error raised inside the page.
    pub fn page_error(&mut self, message: impl Into<String>, stack: Option<String>) {
        let message = message.into();
        self.logs
            .record(LogLevel::Warn, format!("error in page: {}", message));
        if let Some(stack) = &stack {
            self.logs
                .record(LogLevel::Warn, format!("error in page stack: {}", stack));
        }
        let _ = self.events.send(Message::PageError {
            window_id: self.window_id,
            message,
            stack,
        });
    }

    pub fn into_logs(self) -> Vec<LogRecord> {
        self.logs.into_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (TaskContext, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::new("9".to_string(), 1, LogStore::new(true, 1000), tx);
        (ctx, rx)
    }

    #[tokio::test]
    async fn log_records_and_mirrors() {
        let (mut ctx, mut rx) = context();
        ctx.log(LogLevel::Debug, "engine ready");

        match rx.recv().await.unwrap() {
            Message::Log {
                worker_id, message, ..
            } => {
                assert_eq!(worker_id, "9");
                assert_eq!(message, "engine ready");
            }
            other => panic!("unexpected {}", other.event_name()),
        }
        let logs = ctx.into_logs();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].user_level);
    }

    #[tokio::test]
    async fn page_error_stores_message_and_stack() {
        let (mut ctx, mut rx) = context();
        ctx.page_error("boom", Some("at page.js:1".to_string()));

        match rx.recv().await.unwrap() {
            Message::PageError { message, stack, .. } => {
                assert_eq!(message, "boom");
                assert_eq!(stack.as_deref(), Some("at page.js:1"));
            }
            other => panic!("unexpected {}", other.event_name()),
        }
        let logs = ctx.into_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.contains("boom"));
        assert!(logs[1].message.contains("page.js"));
    }

    #[tokio::test]
    async fn page_log_is_user_level() {
        let (mut ctx, mut rx) = context();
        ctx.page_log(LogLevel::Info, "console says hi");
        assert!(matches!(
            rx.recv().await.unwrap(),
            Message::PageLog { window_id: 1, .. }
        ));
        let logs = ctx.into_logs();
        assert!(logs[0].user_level);
    }
}
