//! Pipe serve loop
//!
//! The worker's side of the stdio channel. One task is in flight at a time
//! (the pool never assigns a second one; if it does anyway, the worker
//! answers with an error instead of queueing). Renders run as spawned
//! futures so `ping` keeps being answered while the engine works, and
//! application events stream out as they happen. EOF on stdin means the
//! parent is gone and the worker exits.

use std::sync::Arc;

use pagepress_core::task::TaskFailure;
use pagepress_ipc::{stdio, Message};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::task::TaskRunner;

pub async fn run(runner: Arc<TaskRunner>) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stdio();
    let worker_id = runner.env.worker_id.clone();

    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        loop {
            match reader.read_envelope().await {
                Ok(Some(envelope)) => {
                    if inbound_tx.send(envelope.message).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) if err.is_malformed() => {
                    warn!(error = %err, "dropping malformed message from parent");
                }
                Err(err) => {
                    debug!(error = %err, "parent pipe reader stopped");
                    break;
                }
            }
        }
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Message>();
    let (done_tx, mut done_rx) =
        mpsc::unbounded_channel::<(Uuid, Result<pagepress_core::task::TaskOutput, String>)>();
    let mut in_flight: Option<Uuid> = None;

    info!(worker = %worker_id, "worker serving on the stdio pipe");
    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => match inbound {
                None => {
                    info!("parent channel closed, shutting worker down");
                    break;
                }
                Some(Message::Ping { correlation_id }) => {
                    writer
                        .write_message(Message::Pong {
                            correlation_id,
                            worker_id: worker_id.clone(),
                        })
                        .await?;
                }
                Some(Message::Task { task_id, payload }) => {
                    if in_flight.is_some() {
                        // the pool must never do this; answer instead of queueing
                        warn!(task = %task_id, "task arrived while another is in flight");
                        writer
                            .write_message(Message::TaskResponse {
                                task_id,
                                error: Some(TaskFailure::new(
                                    "worker is already executing a task",
                                )),
                                response: None,
                            })
                            .await?;
                    } else {
                        in_flight = Some(task_id);
                        let runner = runner.clone();
                        let events = events_tx.clone();
                        let done = done_tx.clone();
                        tokio::spawn(async move {
                            let result = runner
                                .run(*payload, events)
                                .await
                                .map_err(|err| err.to_string());
                            let _ = done.send((task_id, result));
                        });
                    }
                }
                Some(other) => {
                    warn!(event = other.event_name(), "dropping unexpected message from parent");
                }
            },
            Some(event) = events_rx.recv() => {
                // best-effort: if the parent is gone the inbound loop ends anyway
                let _ = writer.write_message(event).await;
            }
            Some((task_id, result)) = done_rx.recv() => {
                in_flight = None;
                let message = match result {
                    Ok(output) => Message::TaskResponse {
                        task_id,
                        error: None,
                        response: Some(output),
                    },
                    Err(message) => Message::TaskResponse {
                        task_id,
                        error: Some(TaskFailure::new(message)),
                        response: None,
                    },
                };
                writer.write_message(message).await?;
            }
        }
    }
    Ok(())
}
