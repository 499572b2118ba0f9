//! Worker process entry point
//!
//! Spawned by the pool (or as a dedicated one-shot process) with its whole
//! configuration in environment variables. Stdout belongs to the pipe
//! protocol, so tracing goes to stderr.

use std::sync::Arc;

use anyhow::Context;
use pagepress_core::env::WorkerMode;
use pagepress_worker::{serve_http, serve_pipe, TaskRunner, WorkerEnv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = WorkerEnv::from_env().context("invalid worker environment")?;
    init_tracing(&env);
    tracing::debug!(worker_id = %env.worker_id, mode = %env.mode, "pagepress worker starting");

    let mode = env.mode;
    let port = env.port;
    let runner = Arc::new(TaskRunner::new(env));

    match mode {
        WorkerMode::Pipe => serve_pipe::run(runner).await,
        WorkerMode::Http => {
            let port = port.context("a port is required in http mode")?;
            serve_http::run(runner, port).await
        }
    }
}

fn init_tracing(env: &WorkerEnv) {
    let default_level = if env.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
