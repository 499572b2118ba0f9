//! Error taxonomy for conversion dispatch

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool failed to spawn or ready its workers. Fatal to the pool and
    /// broadcast to every caller waiting on startup.
    #[error("worker pool failed to start: {0}")]
    Startup(String),

    /// A worker process died while idle or mid-task. The in-flight task fails
    /// immediately; the worker may be respawned.
    #[error("worker process crashed: {0}")]
    ProcessCrash(String),

    /// The task missed its deadline. Distinguished from genuine failures so
    /// callers can tell a slow render from a broken one.
    #[error("conversion timed out after {after:?}")]
    Timeout { after: Duration },

    /// The rendering collaborator reported an error; forwarded unchanged.
    #[error("conversion failed: {0}")]
    Render(String),

    /// Malformed or unexpected traffic on the channel. The offending message
    /// is dropped; the pool keeps running.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The bounded waiters queue is at capacity.
    #[error("conversion queue is full ({depth} callers waiting)")]
    QueueFull { depth: usize },

    /// The pool was shut down while the task was queued or in flight.
    #[error("worker pool has been shut down")]
    Stopped,

    /// HTTP transport failure talking to a worker's local endpoint.
    #[error("http transport error: {0}")]
    Http(String),
}

impl PoolError {
    /// Machine-checkable timeout flag.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, PoolError::ProcessCrash(_))
    }
}
