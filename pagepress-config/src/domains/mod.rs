//! Domain-specific configuration modules

pub mod engine;
pub mod pool;
pub mod task;
pub mod utils;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::Validatable;
use engine::EngineConfig;
use pool::PoolConfig;
use task::TaskConfig;

/// How conversions reach a rendering worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Warm worker pool, framed messages over the stdio pipe.
    PooledPipe,
    /// Warm worker pool, one HTTP request per conversion.
    PooledHttp,
    /// Fresh process per conversion, torn down after the response.
    Dedicated,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::PooledPipe
    }
}

/// Root configuration for a conversion factory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConversionConfig {
    pub strategy: Strategy,
    pub pool: PoolConfig,
    pub task: TaskConfig,
    pub engine: EngineConfig,
}

impl Validatable for ConversionConfig {
    fn validate(&self) -> ConfigResult<()> {
        crate::validation::validate_config(self)
    }

    fn domain_name(&self) -> &'static str {
        "conversion"
    }
}
