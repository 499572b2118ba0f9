//! The conversion factory
//!
//! Ties the pieces together: validated configuration in, strategy selection,
//! gate-guarded pool startup, dispatch, and result decoding.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pagepress_config::{validate_config, ConfigError, ConversionConfig, Strategy};
use pagepress_core::env as worker_env;
use pagepress_core::lifecycle::{StartError, StartGate};
use pagepress_core::task::{ConversionSettings, LogRecord, TaskOutput};
use pagepress_pool::{execute_dedicated, ExecuteOpts, PoolError, WorkerPool, WorkerStats};
use tracing::debug;

/// A finished conversion: the document bytes, the page count the engine
/// reported, and the logs collected while the task ran.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub data: Vec<u8>,
    pub page_count: u32,
    pub logs: Vec<LogRecord>,
}

/// Conversion factory. One instance owns one worker pool (for the pooled
/// strategies) and can serve any number of concurrent conversions.
pub struct Conversion {
    config: Arc<ConversionConfig>,
    pool: Option<Arc<WorkerPool>>,
    gate: Arc<StartGate>,
}

impl Conversion {
    pub fn new(config: ConversionConfig) -> Result<Self, ConfigError> {
        validate_config(&config)?;
        let mut config = config;

        // certificate errors would otherwise fail conversions of perfectly
        // renderable pages behind self-signed endpoints
        if config.engine.command_line_switches.is_empty() {
            config
                .engine
                .command_line_switches
                .insert("ignore-certificate-errors".to_string(), None);
        }
        if std::env::var_os(worker_env::DEBUG).is_some() {
            config.engine.debug_mode = true;
        }

        debug!(strategy = ?config.strategy, workers = config.pool.workers, "creating conversion factory");

        let pool = match config.strategy {
            Strategy::Dedicated => None,
            Strategy::PooledPipe | Strategy::PooledHttp => {
                Some(Arc::new(WorkerPool::new(config.clone())))
            }
        };

        Ok(Self {
            config: Arc::new(config),
            pool,
            gate: Arc::new(StartGate::new()),
        })
    }

    /// Convert one document. Accepts full [`ConversionSettings`] or a plain
    /// string, which is treated as inline HTML.
    pub async fn convert(
        &self,
        settings: impl Into<ConversionSettings>,
    ) -> Result<ConversionResult, PoolError> {
        let mut settings = settings.into();
        self.normalize(&mut settings);

        let output = match &self.pool {
            Some(pool) => {
                self.ensure_pool_started(pool).await?;
                pool.execute(settings, ExecuteOpts::default()).await?
            }
            None => execute_dedicated(&self.config, settings).await?,
        };
        decode_output(output)
    }

    /// Terminate the workers. In-flight conversions resolve with an error;
    /// the next `convert` starts a fresh pool.
    pub async fn kill(&self) {
        if let Some(pool) = &self.pool {
            pool.kill().await;
        }
        self.gate.reset();
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Worker diagnostics; empty for the dedicated strategy.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.pool
            .as_ref()
            .map(|pool| pool.worker_stats())
            .unwrap_or_default()
    }

    async fn ensure_pool_started(&self, pool: &Arc<WorkerPool>) -> Result<(), PoolError> {
        let pool = pool.clone();
        self.gate
            .ensure_started(|| async move {
                pool.start()
                    .await
                    .map_err(|err| StartError::new(err.to_string()))
            })
            .await
            .map_err(|err| PoolError::Startup(err.to_string()))
    }

    fn normalize(&self, settings: &mut ConversionSettings) {
        if settings.collect_logs.is_none() {
            settings.collect_logs = Some(self.config.task.collect_logs);
        }
        if settings.converter.is_none() {
            settings.converter = Some(self.config.engine.converter);
        }
    }
}

fn decode_output(output: TaskOutput) -> Result<ConversionResult, PoolError> {
    let data = BASE64.decode(output.data.as_bytes()).map_err(|err| {
        PoolError::Protocol(format!("invalid base64 payload in task response: {}", err))
    })?;
    Ok(ConversionResult {
        data,
        page_count: output.page_count,
        logs: output.logs,
    })
}
