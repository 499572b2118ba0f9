//! Worker-side runtime for pagepress
//!
//! A worker process hosts the rendering collaborator behind the [`Converter`]
//! seam and serves conversion tasks either over the stdio pipe or a local
//! HTTP endpoint, collecting per-task logs as it goes.
//!
//! [`Converter`]: convert::Converter

pub mod context;
pub mod convert;
pub mod env;
pub mod logs;
pub mod serve_http;
pub mod serve_pipe;
pub mod task;

pub use context::TaskContext;
pub use convert::{Converter, ConverterRegistry, RenderFailure, RenderOutput};
pub use env::WorkerEnv;
pub use logs::LogStore;
pub use task::TaskRunner;
