//! Shared setup for the end-to-end tests
//!
//! Every test spawns the real worker binary built by cargo, with the markup
//! engine so no browser binary is needed.

use std::path::PathBuf;
use std::time::Duration;

use pagepress::{ConversionConfig, ConverterKind, Strategy};

pub fn test_config(strategy: Strategy, workers: usize) -> ConversionConfig {
    let mut config = ConversionConfig::default();
    config.strategy = strategy;
    config.pool.workers = workers;
    config.pool.start_timeout = Duration::from_secs(20);
    config.pool.restart_backoff_initial = Duration::from_millis(200);
    config.engine.worker_executable = Some(PathBuf::from(env!("CARGO_BIN_EXE_pagepress-worker")));
    config.engine.converter = ConverterKind::Markup;
    config
}
