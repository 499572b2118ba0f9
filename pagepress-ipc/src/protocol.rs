//! Wire protocol definitions
//!
//! Every message crossing the pipe is one [`Envelope`] per line. Control
//! kinds (`ping`, `pong`, `task`, `taskResponse`) belong to the pool layer
//! and are never surfaced to application-level listeners; the remaining
//! kinds are free-form application events forwarded verbatim.

use chrono::{DateTime, Utc};
use pagepress_core::task::{ConversionSettings, LogLevel, TaskFailure, TaskOutput};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// Health check probe.
    Ping { correlation_id: Uuid },

    /// Health check reply.
    Pong {
        correlation_id: Uuid,
        worker_id: String,
    },

    /// Dispatch one conversion task to a worker.
    Task {
        task_id: Uuid,
        payload: Box<ConversionSettings>,
    },

    /// The single response correlated to a dispatched task.
    TaskResponse {
        task_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskFailure>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<TaskOutput>,
    },

    /// Engine-side log line.
    Log {
        worker_id: String,
        level: LogLevel,
        message: String,
    },

    /// Console output captured from a page.
    #[serde(rename = "page-log")]
    PageLog {
        window_id: u32,
        level: LogLevel,
        message: String,
    },

    /// Script error raised inside a page.
    #[serde(rename = "page-error")]
    PageError {
        window_id: u32,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl Message {
    /// Control kinds are reserved for pool management.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping { .. }
                | Message::Pong { .. }
                | Message::Task { .. }
                | Message::TaskResponse { .. }
        )
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Task { .. } => "task",
            Message::TaskResponse { .. } => "taskResponse",
            Message::Log { .. } => "log",
            Message::PageLog { .. } => "page-log",
            Message::PageError { .. } => "page-error",
        }
    }
}

/// Envelope wrapping every message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_kinds_are_classified() {
        let ping = Message::Ping {
            correlation_id: Uuid::new_v4(),
        };
        let response = Message::TaskResponse {
            task_id: Uuid::new_v4(),
            error: None,
            response: None,
        };
        let log = Message::Log {
            worker_id: "0".to_string(),
            level: LogLevel::Debug,
            message: "engine ready".to_string(),
        };

        assert!(ping.is_control());
        assert!(response.is_control());
        assert!(!log.is_control());
    }

    #[test]
    fn event_tags_match_the_wire_contract() {
        let response = Message::TaskResponse {
            task_id: Uuid::new_v4(),
            error: Some(TaskFailure::new("boom")),
            response: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"event\":\"taskResponse\""));
        assert!(json.contains("\"taskId\""));
        assert!(!json.contains("\"response\""));

        let page_log = Message::PageLog {
            window_id: 3,
            level: LogLevel::Info,
            message: "hello".to_string(),
        };
        let json = serde_json::to_string(&page_log).unwrap();
        assert!(json.contains("\"event\":\"page-log\""));
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope::new(Message::Ping {
            correlation_id: Uuid::new_v4(),
        });
        assert!(envelope.is_compatible());

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.protocol_version, PROTOCOL_VERSION);
        assert!(matches!(parsed.message, Message::Ping { .. }));
    }

    #[test]
    fn task_round_trips_with_payload() {
        let task = Message::Task {
            task_id: Uuid::new_v4(),
            payload: Box::new(ConversionSettings::from_html("<p>hi</p>")),
        };
        let json = serde_json::to_string(&Envelope::new(task)).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        match parsed.message {
            Message::Task { payload, .. } => {
                assert_eq!(payload.html.as_deref(), Some("<p>hi</p>"));
            }
            other => panic!("expected task, got {}", other.event_name()),
        }
    }
}
