//! Dedicated-process strategy
//!
//! Spawns a fresh worker for exactly one task and tears it down after the
//! single correlated response. Trades startup latency for strict isolation;
//! the correlation and timeout contract is the same as for pooled workers.

use std::time::Duration;

use pagepress_config::ConversionConfig;
use pagepress_core::env::WorkerMode;
use pagepress_core::task::{ConversionSettings, TaskOutput};
use pagepress_ipc::Message;
use tracing::{debug, warn};

use crate::dispatch::dispatch;
use crate::error::PoolError;
use crate::worker::{self, fail_pending, resolve_pending, terminate, WorkerLink};

pub async fn execute_dedicated(
    config: &ConversionConfig,
    settings: ConversionSettings,
) -> Result<TaskOutput, PoolError> {
    let timeout = settings
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.task.default_timeout);

    let mut spawned = worker::spawn_worker(config, 0, WorkerMode::Pipe, None)?;
    let link = spawned.link.clone();
    worker::spawn_log_listener(&link, 0);

    let Some(mut control_rx) = spawned.control_rx.take() else {
        return Err(PoolError::Protocol(
            "pipe worker did not expose a control stream".to_string(),
        ));
    };
    let WorkerLink::Pipe { pending, .. } = &link else {
        return Err(PoolError::Protocol(
            "dedicated workers always use the pipe link".to_string(),
        ));
    };

    // route control traffic until the pipe closes, then fail whatever is
    // still pending so a crash is observed immediately
    let router_pending = pending.clone();
    let router = tokio::spawn(async move {
        while let Some(message) = control_rx.recv().await {
            let key = match &message {
                Message::Pong { correlation_id, .. } => Some(*correlation_id),
                Message::TaskResponse { task_id, .. } => Some(*task_id),
                _ => None,
            };
            match key {
                Some(key) => {
                    if !resolve_pending(&router_pending, &key, message) {
                        debug!("discarding response for an already-resolved task");
                    }
                }
                None => warn!("dropping unexpected control message from dedicated worker"),
            }
        }
        fail_pending(&router_pending, false);
    });

    if let Err(err) = worker::wait_ready(0, &link, config.pool.start_timeout).await {
        let _ = spawned.child.start_kill();
        let _ = spawned.child.wait().await;
        router.abort();
        return Err(err);
    }

    let result = dispatch(0, &link, settings, timeout).await;

    match &result {
        Err(PoolError::Timeout { .. }) => {
            // best-effort cancellation: the render dies with the process
            debug!("dedicated conversion timed out, killing the process");
            terminate(&mut spawned.child, config.pool.kill_signal);
            let _ = spawned.child.wait().await;
        }
        _ if config.engine.debug_mode => {
            debug!("debug mode keeps the dedicated worker process alive");
        }
        _ => {
            terminate(&mut spawned.child, config.pool.kill_signal);
            let _ = spawned.child.wait().await;
        }
    }
    router.abort();
    result
}
