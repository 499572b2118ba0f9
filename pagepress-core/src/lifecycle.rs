//! One-time, race-free startup shared by concurrent callers
//!
//! The gate moves through `not started -> starting -> started`. The first
//! caller runs the startup routine; everyone arriving while it runs queues on
//! the same outcome. A failed startup returns the gate to `not started` so a
//! later caller can retry.

use std::future::Future;
use std::mem;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::oneshot;

/// Startup failure broadcast to every caller waiting on the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StartError(pub String);

impl StartError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

enum GateState {
    NotStarted,
    Starting(Vec<oneshot::Sender<Result<(), StartError>>>),
    Started,
}

pub struct StartGate {
    state: Mutex<GateState>,
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::NotStarted),
        }
    }

    /// Run `start` exactly once, queuing concurrent callers onto its outcome.
    ///
    /// Every caller receives exactly one result. If the running caller is
    /// cancelled mid-startup, queued callers are failed and the gate resets.
    pub async fn ensure_started<F, Fut>(&self, start: F) -> Result<(), StartError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StartError>>,
    {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                GateState::Started => return Ok(()),
                GateState::Starting(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push(tx);
                    Some(rx)
                }
                GateState::NotStarted => {
                    *state = GateState::Starting(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return rx.await.unwrap_or_else(|_| {
                Err(StartError::new("startup was abandoned before completing"))
            });
        }

        let guard = RunnerGuard { gate: self };
        let outcome = start().await;
        guard.finish(outcome.clone());
        outcome
    }

    /// Return the gate to `not started`; the next caller starts again.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, GateState::Started) {
            *state = GateState::NotStarted;
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.state.lock().unwrap(), GateState::Started)
    }

    fn settle(&self, outcome: Result<(), StartError>) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            let waiters = match mem::replace(&mut *state, GateState::NotStarted) {
                GateState::Starting(queue) => queue,
                _ => Vec::new(),
            };
            if outcome.is_ok() {
                *state = GateState::Started;
            }
            waiters
        };
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}

/// Resets the gate if the startup future is dropped before completing, so
/// queued callers are not stranded in `starting` forever.
struct RunnerGuard<'a> {
    gate: &'a StartGate,
}

impl RunnerGuard<'_> {
    fn finish(self, outcome: Result<(), StartError>) {
        self.gate.settle(outcome);
        mem::forget(self);
    }
}

impl Drop for RunnerGuard<'_> {
    fn drop(&mut self) {
        self.gate
            .settle(Err(StartError::new("startup was cancelled")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_startup() {
        let gate = Arc::new(StartGate::new());
        let starts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                gate.ensure_started(|| async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(gate.is_started());
    }

    #[tokio::test]
    async fn failure_is_broadcast_and_gate_resets() {
        let gate = Arc::new(StartGate::new());

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.ensure_started(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(StartError::new("spawn exploded"))
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.ensure_started(|| async { Ok(()) }).await })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first, Err(StartError::new("spawn exploded")));
        assert_eq!(second, Err(StartError::new("spawn exploded")));
        assert!(!gate.is_started());

        // the gate is usable again after the failure
        assert!(gate.ensure_started(|| async { Ok(()) }).await.is_ok());
        assert!(gate.is_started());
    }

    #[tokio::test]
    async fn started_gate_short_circuits() {
        let gate = StartGate::new();
        gate.ensure_started(|| async { Ok(()) }).await.unwrap();

        // a second start routine must not run
        let result = gate
            .ensure_started(|| async { Err(StartError::new("must not run")) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reset_allows_a_fresh_startup() {
        let gate = StartGate::new();
        gate.ensure_started(|| async { Ok(()) }).await.unwrap();
        gate.reset();
        assert!(!gate.is_started());

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        gate.ensure_started(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_startup_fails_waiters_and_resets() {
        let gate = Arc::new(StartGate::new());

        let runner = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.ensure_started(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.ensure_started(|| async { Ok(()) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        runner.abort();
        let outcome = waiter.await.unwrap();
        assert!(outcome.is_err());
        assert!(!gate.is_started());
    }
}
