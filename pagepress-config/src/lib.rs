//! Domain-driven configuration for pagepress
//!
//! Configuration is split by functional domain (pool, task, engine), each with
//! documented defaults and validation at construction time. There is no file
//! loader: the embedding application builds a [`ConversionConfig`] in code,
//! the way it would pass an options object to the conversion factory.

pub mod domains;
pub mod error;
pub mod validation;

pub use domains::engine::EngineConfig;
pub use domains::pool::{KillSignal, PoolConfig};
pub use domains::task::TaskConfig;
pub use domains::{ConversionConfig, Strategy};
pub use error::{ConfigError, ConfigResult};
pub use validation::{validate_config, Validatable};
