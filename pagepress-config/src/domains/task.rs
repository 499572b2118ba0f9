//! Task dispatch configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Task dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Timeout applied when a conversion request carries no override.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub default_timeout: Duration,

    /// Whether responses carry the task's log records by default.
    #[serde(default = "crate::domains::utils::default_true")]
    pub collect_logs: bool,

    /// Log messages longer than this are truncated with a trailing marker.
    pub max_log_entry_size: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            collect_logs: true,
            max_log_entry_size: default_max_log_entry_size(),
        }
    }
}

impl Validatable for TaskConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.default_timeout.as_millis(),
            "default_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.max_log_entry_size,
            "max_log_entry_size",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "task"
    }
}

fn default_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_max_log_entry_size() -> usize {
    1000
}
