//! The rendering collaborator seam
//!
//! The core treats rendering as an opaque capability: one trait method that
//! turns settings into a buffer and a page count. Implementations are
//! statically registered and selected by the [`ConverterKind`] enum.

pub mod chromium;
pub mod markup;
mod pdf;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pagepress_core::task::{ConversionSettings, ConverterKind};
use thiserror::Error;

use crate::context::TaskContext;
use crate::env::WorkerEnv;

pub use chromium::ChromiumConverter;
pub use markup::MarkupConverter;

#[derive(Debug, Error)]
pub enum RenderFailure {
    /// The engine reported an error; the message crosses the wire unchanged.
    #[error("{0}")]
    Engine(String),

    #[error("io error during rendering: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderFailure {
    pub fn engine(message: impl Into<String>) -> Self {
        RenderFailure::Engine(message.into())
    }
}

#[derive(Debug)]
pub struct RenderOutput {
    pub data: Vec<u8>,
    pub page_count: u32,
}

/// The rendering collaborator contract: opaque, potentially slow, and
/// cancellable only by killing the process around it.
#[async_trait]
pub trait Converter: Send + Sync {
    fn kind(&self) -> ConverterKind;

    /// One-time engine readiness check before the first task.
    async fn warm_up(&self) -> Result<(), RenderFailure> {
        Ok(())
    }

    async fn render_to_output(
        &self,
        settings: &ConversionSettings,
        ctx: &mut TaskContext,
    ) -> Result<RenderOutput, RenderFailure>;
}

/// Statically registered converters keyed by kind.
pub struct ConverterRegistry {
    converters: HashMap<ConverterKind, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// The built-in set, configured from the worker environment.
    pub fn from_env(env: &WorkerEnv) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ChromiumConverter::new(
            env.engine_path.clone(),
            env.engine_switches.clone(),
            env.allow_local_files,
        )));
        registry.register(Arc::new(MarkupConverter::new()));
        registry
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.converters.insert(converter.kind(), converter);
    }

    pub fn get(&self, kind: ConverterKind) -> Option<Arc<dyn Converter>> {
        self.converters.get(&kind).cloned()
    }
}
