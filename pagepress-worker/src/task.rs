//! One task, start to finish
//!
//! A linear sequence of stages: resolve the converter, render, package the
//! result with the aggregated logs. Each task gets its own context; nothing
//! survives between tasks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pagepress_core::task::{ConversionSettings, LogLevel, TaskOutput};

use crate::context::{EventSink, TaskContext};
use crate::convert::{ConverterRegistry, RenderFailure};
use crate::env::WorkerEnv;
use crate::logs::LogStore;

pub struct TaskRunner {
    pub env: Arc<WorkerEnv>,
    pub registry: Arc<ConverterRegistry>,
    window_counter: AtomicU32,
}

impl TaskRunner {
    pub fn new(env: WorkerEnv) -> Self {
        let registry = ConverterRegistry::from_env(&env);
        Self::with_registry(env, registry)
    }

    pub fn with_registry(env: WorkerEnv, registry: ConverterRegistry) -> Self {
        Self {
            env: Arc::new(env),
            registry: Arc::new(registry),
            window_counter: AtomicU32::new(0),
        }
    }

    pub async fn run(
        &self,
        settings: ConversionSettings,
        events: EventSink,
    ) -> Result<TaskOutput, RenderFailure> {
        let collect_logs = settings.collect_logs.unwrap_or(true);
        let window_id = self.window_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut ctx = TaskContext::new(
            self.env.worker_id.clone(),
            window_id,
            LogStore::new(collect_logs, self.env.max_log_entry_size),
            events,
        );

        let kind = settings.converter.unwrap_or(self.env.converter);
        let Some(converter) = self.registry.get(kind) else {
            return Err(RenderFailure::engine(format!(
                "no converter registered for kind '{}'",
                kind
            )));
        };

        ctx.log(
            LogLevel::Debug,
            format!("converting with the {} engine", kind),
        );
        ctx.log(LogLevel::Debug, "calling converter function..");
        let output = converter.render_to_output(&settings, &mut ctx).await?;
        ctx.log(LogLevel::Debug, "converter function ended..");

        Ok(TaskOutput {
            data: BASE64.encode(output.data),
            page_count: output.page_count,
            logs: ctx.into_logs(),
        })
    }
}
