//! Exactly-once task dispatch against one worker
//!
//! Pipe workers use `task`/`taskResponse` correlation by task id; the pending
//! entry is removed on first resolution, which is what makes a late response
//! a no-op. HTTP workers are request-scoped, so the transport itself provides
//! the correlation.

use std::time::Duration;

use pagepress_core::task::{ConversionSettings, TaskOutput};
use pagepress_ipc::Message;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::PoolError;
use crate::worker::{classify_http_error, PendingReply, WorkerLink};

pub(crate) async fn dispatch(
    worker_id: u32,
    link: &WorkerLink,
    settings: ConversionSettings,
    timeout: Duration,
) -> Result<TaskOutput, PoolError> {
    match link {
        WorkerLink::Pipe { channel, pending } => {
            let task_id = Uuid::new_v4();
            let (tx, rx) = oneshot::channel();
            pending.lock().unwrap().insert(task_id, tx);
            debug!(worker = worker_id, %task_id, "dispatching task");
            channel.emit(Message::Task {
                task_id,
                payload: Box::new(settings),
            });

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(PendingReply::Message(Message::TaskResponse {
                    error, response, ..
                }))) => match (error, response) {
                    (Some(failure), _) => Err(PoolError::Render(failure.message)),
                    (None, Some(output)) => Ok(output),
                    (None, None) => Err(PoolError::Protocol(
                        "task response carried neither an error nor a payload".to_string(),
                    )),
                },
                Ok(Ok(PendingReply::Message(other))) => Err(PoolError::Protocol(format!(
                    "unexpected reply to task: {}",
                    other.event_name()
                ))),
                Ok(Ok(PendingReply::Stopped)) => Err(PoolError::Stopped),
                Ok(Ok(PendingReply::Crashed)) | Ok(Err(_)) => Err(PoolError::ProcessCrash(
                    format!("worker {} exited while the task was in flight", worker_id),
                )),
                Err(_) => {
                    // mark the task resolved; a late response becomes a no-op
                    pending.lock().unwrap().remove(&task_id);
                    debug!(worker = worker_id, %task_id, "task timed out");
                    Err(PoolError::Timeout { after: timeout })
                }
            }
        }
        WorkerLink::Http { endpoint, client } => {
            let response = client
                .post(endpoint.as_str())
                .json(&settings)
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| classify_http_error(worker_id, err, timeout))?;
            if response.status().is_success() {
                response
                    .json::<TaskOutput>()
                    .await
                    .map_err(|err| PoolError::Protocol(format!("invalid task response: {}", err)))
            } else {
                let message = response.text().await.unwrap_or_default();
                Err(PoolError::Render(message))
            }
        }
    }
}
