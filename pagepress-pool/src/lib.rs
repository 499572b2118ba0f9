//! Worker-process orchestration for pagepress
//!
//! This crate owns the hard part of the system: spawning, supervising, and
//! talking to rendering worker processes. It provides the warm [`WorkerPool`]
//! with correlation-based task dispatch, timeouts, crash recovery with
//! bounded respawns, and the one-shot [`execute_dedicated`] strategy.

pub mod backoff;
pub mod dedicated;
mod dispatch;
pub mod error;
pub mod pool;
mod worker;

pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use dedicated::execute_dedicated;
pub use error::PoolError;
pub use pool::{ExecuteOpts, WorkerPool, WorkerStats, WorkerStatus};
