//! Worker pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Signal used to terminate worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSignal {
    /// SIGTERM on unix, hard kill elsewhere.
    Term,
    /// Unconditional hard kill.
    Kill,
}

impl Default for KillSignal {
    fn default() -> Self {
        KillSignal::Kill
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of warm worker processes.
    pub workers: usize,

    /// Grace period for all workers to signal readiness on startup.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub start_timeout: Duration,

    /// Maximum callers allowed to queue for a free worker before the pool
    /// rejects with a queue-full error.
    pub max_queue_depth: usize,

    /// Respawn a crashed worker instead of removing it.
    #[serde(default = "crate::domains::utils::default_true")]
    pub restart_on_crash: bool,

    /// Consecutive respawn attempts before a worker is removed permanently.
    pub max_restart_attempts: u32,

    /// Initial respawn backoff delay; doubles per attempt.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub restart_backoff_initial: Duration,

    /// Respawn backoff cap.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub restart_backoff_max: Duration,

    /// A worker staying up this long resets its restart counter.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub restart_window: Duration,

    /// Interval of the ping/stuck-worker health sweep.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub health_check_interval: Duration,

    /// Extra slack past the task timeout before a busy worker counts as stuck.
    #[serde(with = "crate::domains::utils::serde_duration_ms")]
    pub stuck_grace: Duration,

    pub kill_signal: KillSignal,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            start_timeout: default_start_timeout(),
            max_queue_depth: default_max_queue_depth(),
            restart_on_crash: true,
            max_restart_attempts: default_max_restart_attempts(),
            restart_backoff_initial: Duration::from_millis(500),
            restart_backoff_max: Duration::from_secs(30),
            restart_window: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(10),
            stuck_grace: Duration::from_secs(5),
            kill_signal: KillSignal::default(),
        }
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.workers, "workers", self.domain_name())?;
        validate_positive(self.max_queue_depth, "max_queue_depth", self.domain_name())?;
        validate_positive(
            self.start_timeout.as_millis(),
            "start_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.restart_backoff_initial.as_millis(),
            "restart_backoff_initial",
            self.domain_name(),
        )?;
        validate_positive(
            self.health_check_interval.as_millis(),
            "health_check_interval",
            self.domain_name(),
        )?;
        if self.restart_backoff_max < self.restart_backoff_initial {
            return Err(self
                .validation_error("restart_backoff_max must not be below restart_backoff_initial"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

fn default_workers() -> usize {
    2
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_queue_depth() -> usize {
    32
}

fn default_max_restart_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.workers, 2);
        assert!(config.restart_on_crash);
        assert_eq!(config.max_restart_attempts, 3);
        assert_eq!(config.kill_signal, KillSignal::Kill);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_is_invalid() {
        let config = PoolConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_backoff_bounds_are_invalid() {
        let config = PoolConfig {
            restart_backoff_initial: Duration::from_secs(5),
            restart_backoff_max: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
