//! HTTP request router
//!
//! The server transport variant: a loopback HTTP listener accepting one JSON
//! settings body per conversion. The transport is request-scoped, so there is
//! no task-id correlation here; the startup gate still ensures the engine is
//! warm before the first conversion is served. Application events go through
//! a loopback channel since this worker has no parent pipe.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pagepress_core::lifecycle::{StartError, StartGate};
use pagepress_core::task::ConversionSettings;
use pagepress_ipc::{Message, MessageChannel};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::task::TaskRunner;

#[derive(Clone)]
struct AppState {
    runner: Arc<TaskRunner>,
    gate: Arc<StartGate>,
    // one render at a time, matching the pipe worker's contract
    busy: Arc<Mutex<()>>,
    channel: MessageChannel,
}

pub async fn run(runner: Arc<TaskRunner>, port: u16) -> anyhow::Result<()> {
    let channel = MessageChannel::loopback();
    spawn_event_logger(&channel);

    let state = AppState {
        runner,
        gate: Arc::new(StartGate::new()),
        busy: Arc::new(Mutex::new(())),
        channel,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/", post(convert))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "worker serving on the http router");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Response {
    match ensure_engine(&state).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn convert(
    State(state): State<AppState>,
    Json(settings): Json<ConversionSettings>,
) -> Response {
    if let Err(err) = ensure_engine(&state).await {
        return (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response();
    }

    let _busy = state.busy.lock().await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let channel = state.channel.clone();
    let forward = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            channel.emit(event);
        }
    });

    let result = state.runner.run(settings, events_tx).await;
    let _ = forward.await;

    match result {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Warm the configured engine exactly once, sharing the outcome with every
/// request that arrives while the warm-up runs.
async fn ensure_engine(state: &AppState) -> Result<(), StartError> {
    let runner = state.runner.clone();
    state
        .gate
        .ensure_started(|| async move {
            let Some(converter) = runner.registry.get(runner.env.converter) else {
                return Err(StartError::new(format!(
                    "no converter registered for kind '{}'",
                    runner.env.converter
                )));
            };
            converter
                .warm_up()
                .await
                .map_err(|err| StartError::new(err.to_string()))
        })
        .await
}

/// Mirror loopback application events into the worker's own tracing output.
fn spawn_event_logger(channel: &MessageChannel) {
    let mut events = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Message::Log { level, message, .. }) => {
                    debug!(target: "pagepress::engine", level = level.as_str(), "{}", message);
                }
                Ok(Message::PageLog {
                    window_id, message, ..
                }) => {
                    debug!(target: "pagepress::page", window = window_id, "{}", message);
                }
                Ok(Message::PageError {
                    window_id, message, ..
                }) => {
                    warn!(target: "pagepress::page", window = window_id, "error in page: {}", message);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
