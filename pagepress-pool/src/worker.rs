//! Spawning and reaching a single worker process
//!
//! A worker is spawned with its whole configuration in environment variables
//! and reached through a [`WorkerLink`]: either the framed stdio pipe or the
//! worker's local HTTP endpoint.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::PoolError;

use pagepress_config::{ConversionConfig, KillSignal};
use pagepress_core::env as worker_env;
use pagepress_core::env::WorkerMode;
use pagepress_ipc::{Message, MessageChannel};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Resolution delivered to a caller waiting on a correlation id.
#[derive(Debug)]
pub(crate) enum PendingReply {
    Message(Message),
    Crashed,
    Stopped,
}

pub(crate) type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<PendingReply>>>>;

/// How the pool reaches one worker.
#[derive(Clone)]
pub(crate) enum WorkerLink {
    Pipe {
        channel: MessageChannel,
        pending: PendingMap,
    },
    Http {
        endpoint: String,
        client: reqwest::Client,
    },
}

pub(crate) struct SpawnedWorker {
    pub child: Child,
    pub link: WorkerLink,
    /// Control message stream; `None` for HTTP workers.
    pub control_rx: Option<mpsc::UnboundedReceiver<Message>>,
}

pub(crate) fn spawn_worker(
    config: &ConversionConfig,
    id: u32,
    mode: WorkerMode,
    port: Option<u16>,
) -> Result<SpawnedWorker, PoolError> {
    let executable = config
        .engine
        .resolve_worker_executable()
        .map_err(|err| PoolError::Startup(err.to_string()))?;
    let switches = serde_json::to_string(&config.engine.command_line_switches)
        .map_err(|err| PoolError::Startup(format!("cannot serialize engine switches: {}", err)))?;

    let mut command = Command::new(&executable);
    command
        .env(worker_env::WORKER_ID, id.to_string())
        .env(worker_env::WORKER_MODE, mode.as_str())
        .env(worker_env::CONVERTER, config.engine.converter.as_str())
        .env(worker_env::ENGINE_SWITCHES, switches)
        .env(
            worker_env::ALLOW_LOCAL_FILES,
            config.engine.allow_local_files_access.to_string(),
        )
        .env(
            worker_env::MAX_LOG_ENTRY_SIZE,
            config.task.max_log_entry_size.to_string(),
        )
        .kill_on_drop(!config.engine.debug_mode);
    if let Some(path) = &config.engine.engine_path {
        command.env(worker_env::ENGINE_PATH, path);
    }
    if config.engine.debug_mode {
        command.env(worker_env::DEBUG, "1");
        command.stderr(Stdio::inherit());
    } else {
        command.stderr(Stdio::null());
    }
    match mode {
        WorkerMode::Pipe => {
            command.stdin(Stdio::piped()).stdout(Stdio::piped());
        }
        WorkerMode::Http => {
            let Some(port) = port else {
                return Err(PoolError::Startup(
                    "http workers require a port".to_string(),
                ));
            };
            command
                .env(worker_env::WORKER_PORT, port.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::null());
        }
    }

    debug!(worker = id, mode = %mode, executable = %executable.display(), "spawning worker");
    let mut child = command.spawn().map_err(|err| {
        PoolError::Startup(format!(
            "failed to spawn worker {} from {}: {}",
            id,
            executable.display(),
            err
        ))
    })?;

    match mode {
        WorkerMode::Pipe => {
            let stdin = child.stdin.take().ok_or_else(|| {
                PoolError::Startup("worker stdin pipe was not captured".to_string())
            })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                PoolError::Startup("worker stdout pipe was not captured".to_string())
            })?;
            let (channel, control_rx) = MessageChannel::wrap(stdout, stdin);
            Ok(SpawnedWorker {
                child,
                link: WorkerLink::Pipe {
                    channel,
                    pending: Arc::new(Mutex::new(HashMap::new())),
                },
                control_rx: Some(control_rx),
            })
        }
        WorkerMode::Http => {
            let endpoint = format!("http://127.0.0.1:{}", port.unwrap_or_default());
            Ok(SpawnedWorker {
                child,
                link: WorkerLink::Http {
                    endpoint,
                    client: reqwest::Client::new(),
                },
                control_rx: None,
            })
        }
    }
}

/// One ping round-trip (pipe) or health probe (HTTP).
pub(crate) async fn ping(id: u32, link: &WorkerLink, timeout: Duration) -> Result<(), PoolError> {
    match link {
        WorkerLink::Pipe { channel, pending } => {
            let correlation_id = Uuid::new_v4();
            let (tx, rx) = oneshot::channel();
            pending.lock().unwrap().insert(correlation_id, tx);
            channel.emit(Message::Ping { correlation_id });
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(PendingReply::Message(Message::Pong { .. }))) => Ok(()),
                Ok(Ok(PendingReply::Message(other))) => Err(PoolError::Protocol(format!(
                    "unexpected reply to ping: {}",
                    other.event_name()
                ))),
                Ok(Ok(PendingReply::Stopped)) => Err(PoolError::Stopped),
                Ok(Ok(PendingReply::Crashed)) | Ok(Err(_)) => Err(PoolError::ProcessCrash(
                    format!("worker {} exited during its health check", id),
                )),
                Err(_) => {
                    pending.lock().unwrap().remove(&correlation_id);
                    Err(PoolError::Timeout { after: timeout })
                }
            }
        }
        WorkerLink::Http { endpoint, client } => {
            let response = client
                .get(format!("{}/health", endpoint))
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| classify_http_error(id, err, timeout))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(PoolError::Http(format!(
                    "worker {} health endpoint returned {}",
                    id,
                    response.status()
                )))
            }
        }
    }
}

/// Wait for the readiness handshake after a spawn.
pub(crate) async fn wait_ready(
    id: u32,
    link: &WorkerLink,
    grace: Duration,
) -> Result<(), PoolError> {
    match link {
        // messages queue in the pipe, so a single ping with the full grace
        // period doubles as the handshake
        WorkerLink::Pipe { .. } => ping(id, link, grace).await.map_err(|err| match err {
            PoolError::Timeout { .. } => PoolError::Startup(format!(
                "worker {} did not answer its readiness handshake within {:?}",
                id, grace
            )),
            other => other,
        }),
        WorkerLink::Http { .. } => {
            let deadline = Instant::now() + grace;
            loop {
                let probe_timeout = Duration::from_millis(500).min(grace);
                match ping(id, link, probe_timeout).await {
                    Ok(()) => return Ok(()),
                    Err(_) if Instant::now() < deadline => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(err) => {
                        return Err(PoolError::Startup(format!(
                            "worker {} was not ready within {:?}: {}",
                            id, grace, err
                        )))
                    }
                }
            }
        }
    }
}

pub(crate) fn classify_http_error(id: u32, err: reqwest::Error, timeout: Duration) -> PoolError {
    if err.is_timeout() {
        PoolError::Timeout { after: timeout }
    } else if err.is_connect() {
        PoolError::ProcessCrash(format!("worker {} is not reachable: {}", id, err))
    } else {
        PoolError::Http(err.to_string())
    }
}

/// Deliver a message to the caller registered under `key`. Returns false when
/// nobody is waiting anymore (late or duplicate traffic).
pub(crate) fn resolve_pending(pending: &PendingMap, key: &Uuid, message: Message) -> bool {
    let sender = pending.lock().unwrap().remove(key);
    match sender {
        Some(tx) => {
            let _ = tx.send(PendingReply::Message(message));
            true
        }
        None => false,
    }
}

/// Fail every pending caller; used when the worker's pipe closes.
pub(crate) fn fail_pending(pending: &PendingMap, stopping: bool) {
    let senders: Vec<_> = {
        let mut pending = pending.lock().unwrap();
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in senders {
        let _ = tx.send(if stopping {
            PendingReply::Stopped
        } else {
            PendingReply::Crashed
        });
    }
}

/// Stream the worker's application events into our own tracing output.
pub(crate) fn spawn_log_listener(link: &WorkerLink, id: u32) {
    let WorkerLink::Pipe { channel, .. } = link else {
        return;
    };
    let mut events = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Message::Log {
                    worker_id,
                    level,
                    message,
                }) => {
                    debug!(target: "pagepress::engine", worker = %worker_id, level = level.as_str(), "{}", message);
                }
                Ok(Message::PageLog {
                    window_id,
                    level,
                    message,
                }) => {
                    debug!(target: "pagepress::page", window = window_id, level = level.as_str(), "{}", message);
                }
                Ok(Message::PageError {
                    window_id,
                    message,
                    stack,
                }) => {
                    warn!(
                        target: "pagepress::page",
                        window = window_id,
                        stack = stack.as_deref().unwrap_or(""),
                        "error in page: {}", message
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(worker = id, skipped, "dropped engine log events after lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub(crate) fn pick_free_port() -> Result<u16, PoolError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|err| PoolError::Startup(format!("cannot allocate a worker port: {}", err)))?;
    let port = listener
        .local_addr()
        .map_err(|err| PoolError::Startup(err.to_string()))?
        .port();
    Ok(port)
}

/// Best-effort process termination honoring the configured kill signal.
pub(crate) fn terminate(child: &mut Child, signal: KillSignal) {
    if let KillSignal::Term = signal {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                return;
            }
        }
    }
    let _ = child.start_kill();
}

