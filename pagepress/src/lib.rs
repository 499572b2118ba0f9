//! HTML to PDF conversion through isolated rendering worker processes
//!
//! A conversion factory owns a pool of warm rendering workers (or spawns a
//! dedicated process per task), dispatches conversion tasks over a framed
//! pipe or local HTTP, enforces timeouts, and aggregates the logs the engine
//! emitted while rendering.
//!
//! ```no_run
//! use pagepress::{Conversion, ConversionConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let conversion = Conversion::new(ConversionConfig::default())?;
//! let result = conversion.convert("<h1>hello</h1>").await?;
//! println!("{} pages", result.page_count);
//! conversion.kill().await;
//! # Ok(())
//! # }
//! ```

mod conversion;

pub use conversion::{Conversion, ConversionResult};
pub use pagepress_config::{
    ConfigError, ConversionConfig, EngineConfig, KillSignal, PoolConfig, Strategy, TaskConfig,
};
pub use pagepress_core::task::{
    ConversionSettings, ConverterKind, LogLevel, LogRecord, PdfOptions,
};
pub use pagepress_pool::{ExecuteOpts, PoolError, WorkerStats, WorkerStatus};
