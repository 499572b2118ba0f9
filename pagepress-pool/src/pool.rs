//! The worker pool
//!
//! Owns a fixed-size set of warm rendering worker processes. Each worker has
//! a supervisor task that routes its control messages, reaps it on exit,
//! fails its in-flight work, and respawns it with bounded backoff. Pool state
//! (slot map, waiter queue) is only ever mutated here, behind its own locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pagepress_config::{ConversionConfig, Strategy};
use pagepress_core::env::WorkerMode;
use pagepress_core::task::{ConversionSettings, TaskOutput};
use pagepress_ipc::Message;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffCalculator, BackoffStrategy};
use crate::dispatch::dispatch;
use crate::error::PoolError;
use crate::worker::{
    self, fail_pending, pick_free_port, resolve_pending, terminate, WorkerLink,
};

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Worker lifecycle as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Ready,
    Busy,
    /// The caller timed out but the worker may still answer; unavailable
    /// until the late response frees it or the health sweep kills it.
    Draining,
    /// Crashed; a replacement is on its way.
    Respawning,
    Dead,
}

/// Point-in-time view of one worker, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: u32,
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    pub restart_count: u32,
    pub uptime: Duration,
}

/// Per-request dispatch options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOpts {
    /// Overrides both the settings-level and pool-wide timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Idle,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum KillReason {
    Shutdown,
    Stuck,
    Unhealthy,
}

struct Slot {
    pid: Option<u32>,
    status: WorkerStatus,
    /// When a busy/draining worker counts as stuck.
    busy_deadline: Option<Instant>,
    spawned_at: Instant,
    restart_count: u32,
    link: Option<WorkerLink>,
    kill_tx: Option<mpsc::UnboundedSender<KillReason>>,
    epoch: u64,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            pid: None,
            status: WorkerStatus::Dead,
            busy_deadline: None,
            spawned_at: Instant::now(),
            restart_count: 0,
            link: None,
            kill_tx: None,
            epoch: 0,
        }
    }
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ConversionConfig,
    mode: WorkerMode,
    state: Mutex<PoolState>,
    slots: Mutex<Vec<Slot>>,
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
    next_epoch: AtomicU64,
    generation: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: ConversionConfig) -> Self {
        let mode = match config.strategy {
            Strategy::PooledHttp => WorkerMode::Http,
            _ => WorkerMode::Pipe,
        };
        Self {
            inner: Arc::new(PoolInner {
                config,
                mode,
                state: Mutex::new(PoolState::Idle),
                slots: Mutex::new(Vec::new()),
                waiters: Mutex::new(VecDeque::new()),
                next_epoch: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn all workers and wait for each readiness handshake. Fails with
    /// `Startup` if any worker misses the grace period, killing whatever was
    /// already spawned.
    pub async fn start(&self) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == PoolState::Started {
                return Ok(());
            }
            *state = PoolState::Idle;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut slots = self.inner.slots.lock().unwrap();
            *slots = (0..self.inner.config.pool.workers)
                .map(|_| Slot::vacant())
                .collect();
        }
        self.inner.waiters.lock().unwrap().clear();

        let worker_count = self.inner.config.pool.workers as u32;
        let grace = self.inner.config.pool.start_timeout;
        info!(workers = worker_count, mode = %self.inner.mode, "starting worker pool");

        let inner = self.inner.clone();
        let spawn_all = async move {
            for id in 0..worker_count {
                let (link, epoch) = PoolInner::register_worker(&inner, id, 0)?;
                worker::wait_ready(id, &link, grace).await?;
                inner.mark_ready(id, epoch);
            }
            Ok::<(), PoolError>(())
        };

        match tokio::time::timeout(grace, spawn_all).await {
            Ok(Ok(())) => {
                *self.inner.state.lock().unwrap() = PoolState::Started;
                let generation = self.inner.generation.load(Ordering::SeqCst);
                tokio::spawn(PoolInner::health_sweep(self.inner.clone(), generation));
                info!("worker pool started");
                Ok(())
            }
            Ok(Err(err)) => {
                self.inner.kill_all_children();
                Err(match err {
                    PoolError::Startup(_) => err,
                    other => PoolError::Startup(other.to_string()),
                })
            }
            Err(_) => {
                self.inner.kill_all_children();
                Err(PoolError::Startup(format!(
                    "workers failed to become ready within {:?}",
                    grace
                )))
            }
        }
    }

    /// Run one conversion on an available worker. The timeout bounds the
    /// whole operation: waiting for a free worker plus the dispatch itself.
    pub async fn execute(
        &self,
        settings: ConversionSettings,
        opts: ExecuteOpts,
    ) -> Result<TaskOutput, PoolError> {
        let timeout = opts
            .timeout
            .or_else(|| settings.timeout_ms.map(Duration::from_millis))
            .unwrap_or(self.inner.config.task.default_timeout);

        let started = Instant::now();
        let (id, epoch) = match tokio::time::timeout(timeout, self.inner.acquire()).await {
            Ok(result) => result?,
            Err(_) => return Err(PoolError::Timeout { after: timeout }),
        };

        let link = {
            let slots = self.inner.slots.lock().unwrap();
            slots.get(id as usize).and_then(|slot| slot.link.clone())
        };
        let Some(link) = link else {
            return Err(PoolError::ProcessCrash(format!(
                "worker {} disappeared before dispatch",
                id
            )));
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        self.inner
            .note_deadline(id, epoch, remaining + self.inner.config.pool.stuck_grace);
        let result = dispatch(id, &link, settings, remaining).await;
        match &result {
            // the worker may still answer; keep it unavailable until then
            Err(PoolError::Timeout { .. }) => self.inner.set_draining(id, epoch),
            // the supervisor owns the slot after a crash or shutdown
            Err(PoolError::ProcessCrash(_)) | Err(PoolError::Stopped) => {}
            _ => self.inner.release(id, epoch),
        }
        result
    }

    /// Terminate all workers. In-flight tasks resolve with an error, and a
    /// later `start` builds a fresh set of workers.
    pub async fn kill(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == PoolState::Stopped {
                return;
            }
            *state = PoolState::Stopped;
        }
        info!("killing worker pool");
        let kill_txs: Vec<_> = {
            let mut slots = self.inner.slots.lock().unwrap();
            slots
                .iter_mut()
                .filter_map(|slot| slot.kill_tx.take())
                .collect()
        };
        for tx in kill_txs {
            let _ = tx.send(KillReason::Shutdown);
        }
        self.inner.wake_all_waiters();

        // give supervisors a moment to reap their children
        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        loop {
            let all_dead = self
                .inner
                .slots
                .lock()
                .unwrap()
                .iter()
                .all(|slot| slot.status == WorkerStatus::Dead);
            if all_dead || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.inner
            .slots
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(index, slot)| WorkerStats {
                worker_id: index as u32,
                pid: slot.pid,
                status: slot.status,
                restart_count: slot.restart_count,
                uptime: slot.spawned_at.elapsed(),
            })
            .collect()
    }

    pub fn is_started(&self) -> bool {
        *self.inner.state.lock().unwrap() == PoolState::Started
    }
}

impl PoolInner {
    /// Spawn one worker process, install it in its slot, and hand it to a
    /// supervisor task. Readiness is awaited separately by the caller.
    fn register_worker(
        inner: &Arc<PoolInner>,
        id: u32,
        restart_count: u32,
    ) -> Result<(WorkerLink, u64), PoolError> {
        let port = match inner.mode {
            WorkerMode::Http => Some(pick_free_port()?),
            WorkerMode::Pipe => None,
        };
        let mut spawned = worker::spawn_worker(&inner.config, id, inner.mode, port)?;
        let epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let link = spawned.link.clone();
        let control_rx = spawned.control_rx.take();
        let pid = spawned.child.id();

        {
            let mut slots = inner.slots.lock().unwrap();
            let Some(slot) = slots.get_mut(id as usize) else {
                return Err(PoolError::Startup(format!(
                    "worker slot {} does not exist",
                    id
                )));
            };
            *slot = Slot {
                pid,
                status: WorkerStatus::Starting,
                busy_deadline: None,
                spawned_at: Instant::now(),
                restart_count,
                link: Some(link.clone()),
                kill_tx: Some(kill_tx),
                epoch,
            };
        }

        worker::spawn_log_listener(&link, id);
        tokio::spawn(PoolInner::supervise(
            inner.clone(),
            id,
            epoch,
            spawned.child,
            link.clone(),
            control_rx,
            kill_rx,
        ));
        Ok((link, epoch))
    }

    /// Per-worker supervisor: routes control traffic, terminates on demand,
    /// and reaps the process when it exits.
    async fn supervise(
        inner: Arc<PoolInner>,
        id: u32,
        epoch: u64,
        mut child: Child,
        link: WorkerLink,
        mut control_rx: Option<mpsc::UnboundedReceiver<Message>>,
        kill_rx: mpsc::UnboundedReceiver<KillReason>,
    ) {
        let signal = inner.config.pool.kill_signal;
        let mut kill_rx = Some(kill_rx);
        loop {
            tokio::select! {
                inbound = recv_or_pending(&mut control_rx) => match inbound {
                    Some(message) => inner.route_control(id, epoch, &link, message),
                    None => {
                        // pipe closed underneath us; force the process down
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        break;
                    }
                },
                reason = recv_or_pending(&mut kill_rx) => {
                    if let Some(reason) = reason {
                        debug!(worker = id, ?reason, "terminating worker");
                        terminate(&mut child, signal);
                    }
                },
                status = child.wait() => {
                    match status {
                        Ok(status) => debug!(worker = id, %status, "worker exited"),
                        Err(err) => debug!(worker = id, error = %err, "failed to reap worker"),
                    }
                    break;
                }
            }
        }
        PoolInner::handle_worker_exit(&inner, id, epoch, &link).await;
    }

    fn route_control(&self, id: u32, epoch: u64, link: &WorkerLink, message: Message) {
        let WorkerLink::Pipe { pending, .. } = link else {
            return;
        };
        match &message {
            Message::Pong { correlation_id, .. } => {
                let key = *correlation_id;
                if !resolve_pending(pending, &key, message) {
                    debug!(worker = id, "dropping pong with no waiter");
                }
            }
            Message::TaskResponse { task_id, .. } => {
                let key = *task_id;
                if !resolve_pending(pending, &key, message) {
                    // a response for a task whose caller already timed out:
                    // its only remaining effect is freeing the worker
                    debug!(worker = id, task = %key, "discarding response for an already-resolved task");
                    self.release_draining(id, epoch);
                }
            }
            other => {
                warn!(
                    worker = id,
                    event = other.event_name(),
                    "dropping unexpected control message from worker"
                );
            }
        }
    }

    /// Crash/exit cleanup: fail pending work, then either respawn with
    /// bounded backoff or remove the worker permanently.
    async fn handle_worker_exit(inner: &Arc<PoolInner>, id: u32, epoch: u64, link: &WorkerLink) {
        let stopping = *inner.state.lock().unwrap() == PoolState::Stopped;
        if let WorkerLink::Pipe { pending, .. } = link {
            fail_pending(pending, stopping);
        }

        let pool_started = *inner.state.lock().unwrap() == PoolState::Started;
        let config = &inner.config.pool;
        let mut base_attempts = 0;
        let respawning = {
            let mut slots = inner.slots.lock().unwrap();
            let Some(slot) = slots.get_mut(id as usize) else {
                return;
            };
            if slot.epoch != epoch {
                return;
            }
            let uptime = slot.spawned_at.elapsed();
            base_attempts = if uptime >= config.restart_window {
                0
            } else {
                slot.restart_count
            };
            slot.pid = None;
            slot.link = None;
            slot.kill_tx = None;
            slot.busy_deadline = None;
            let respawn = pool_started
                && !stopping
                && config.restart_on_crash
                && base_attempts < config.max_restart_attempts;
            slot.status = if respawn {
                WorkerStatus::Respawning
            } else {
                WorkerStatus::Dead
            };
            respawn
        };

        if !respawning {
            if stopping || !pool_started {
                debug!(worker = id, "worker terminated during pool shutdown");
            } else {
                error!(worker = id, "worker exited and will not be respawned");
            }
            inner.wake_all_waiters();
            return;
        }

        let backoff = BackoffCalculator::new(
            BackoffStrategy::Exponential { base: 2.0 },
            config.restart_backoff_initial,
            config.restart_backoff_max,
            true,
        );
        let mut attempts = base_attempts;
        loop {
            attempts += 1;
            let delay = backoff.calculate_delay(attempts);
            warn!(
                worker = id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "worker exited unexpectedly, respawning after backoff"
            );
            tokio::time::sleep(delay).await;

            if *inner.state.lock().unwrap() != PoolState::Started {
                return;
            }
            {
                let slots = inner.slots.lock().unwrap();
                let Some(slot) = slots.get(id as usize) else {
                    return;
                };
                if slot.epoch != epoch || slot.status != WorkerStatus::Respawning {
                    return;
                }
            }

            match PoolInner::register_worker(inner, id, attempts) {
                Ok((new_link, new_epoch)) => {
                    match worker::wait_ready(id, &new_link, inner.config.pool.start_timeout).await {
                        Ok(()) => {
                            info!(worker = id, "worker respawned");
                            inner.mark_ready(id, new_epoch);
                        }
                        Err(err) => {
                            warn!(worker = id, error = %err, "respawned worker failed its readiness handshake");
                            inner.kill_slot(id, new_epoch);
                        }
                    }
                    // the new supervisor owns any further attempts
                    return;
                }
                Err(err) => {
                    warn!(worker = id, error = %err, "worker respawn failed");
                    if attempts >= config.max_restart_attempts {
                        {
                            let mut slots = inner.slots.lock().unwrap();
                            if let Some(slot) = slots.get_mut(id as usize) {
                                if slot.epoch == epoch {
                                    slot.status = WorkerStatus::Dead;
                                }
                            }
                        }
                        error!(
                            worker = id,
                            "worker exhausted its restart attempts and was removed"
                        );
                        inner.wake_all_waiters();
                        return;
                    }
                }
            }
        }
    }

    /// Periodic sweep: pings idle workers and kills workers that stayed busy
    /// past the task deadline (stuck-worker detection).
    async fn health_sweep(inner: Arc<PoolInner>, generation: u64) {
        let interval = inner.config.pool.health_check_interval;
        loop {
            tokio::time::sleep(interval).await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if *inner.state.lock().unwrap() != PoolState::Started {
                return;
            }

            let mut stuck = Vec::new();
            let mut idle = Vec::new();
            {
                let slots = inner.slots.lock().unwrap();
                for (index, slot) in slots.iter().enumerate() {
                    match slot.status {
                        WorkerStatus::Busy | WorkerStatus::Draining => {
                            if slot
                                .busy_deadline
                                .is_some_and(|deadline| Instant::now() > deadline)
                            {
                                stuck.push((index as u32, slot.epoch));
                            }
                        }
                        WorkerStatus::Ready => {
                            idle.push((index as u32, slot.epoch, slot.link.clone()))
                        }
                        _ => {}
                    }
                }
            }

            for (id, epoch) in stuck {
                warn!(
                    worker = id,
                    "worker exceeded the task deadline without responding, killing it"
                );
                inner.kill_slot_with(id, epoch, KillReason::Stuck);
            }
            for (id, epoch, link) in idle {
                let Some(link) = link else { continue };
                if let Err(err) = worker::ping(id, &link, PING_TIMEOUT.min(interval)).await {
                    warn!(worker = id, error = %err, "worker missed its health check, killing it");
                    inner.kill_slot_with(id, epoch, KillReason::Unhealthy);
                }
            }
        }
    }

    async fn acquire(&self) -> Result<(u32, u64), PoolError> {
        loop {
            let waiter = {
                match *self.state.lock().unwrap() {
                    PoolState::Stopped => return Err(PoolError::Stopped),
                    PoolState::Idle => {
                        return Err(PoolError::Startup(
                            "worker pool is not started".to_string(),
                        ))
                    }
                    PoolState::Started => {}
                }
                let mut slots = self.slots.lock().unwrap();
                if let Some((index, slot)) = slots
                    .iter_mut()
                    .enumerate()
                    .find(|(_, slot)| slot.status == WorkerStatus::Ready)
                {
                    slot.status = WorkerStatus::Busy;
                    slot.busy_deadline = None;
                    return Ok((index as u32, slot.epoch));
                }
                if slots.iter().all(|slot| slot.status == WorkerStatus::Dead) {
                    return Err(PoolError::ProcessCrash(
                        "no live workers remain in the pool".to_string(),
                    ));
                }
                // the waiter is queued while still holding the slot lock so a
                // concurrent release cannot slip between check and enqueue
                let mut waiters = self.waiters.lock().unwrap();
                if waiters.len() >= self.config.pool.max_queue_depth {
                    return Err(PoolError::QueueFull {
                        depth: waiters.len(),
                    });
                }
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                rx
            };
            let _ = waiter.await;
        }
    }

    fn release(&self, id: u32, epoch: u64) {
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(id as usize) {
                if slot.epoch == epoch && slot.status == WorkerStatus::Busy {
                    slot.status = WorkerStatus::Ready;
                    slot.busy_deadline = None;
                }
            }
        }
        self.wake_one_waiter();
    }

    /// Record how long the worker may stay busy before the health sweep
    /// counts it as stuck.
    fn note_deadline(&self, id: u32, epoch: u64, allowance: Duration) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(id as usize) {
            if slot.epoch == epoch && slot.status == WorkerStatus::Busy {
                slot.busy_deadline = Some(Instant::now() + allowance);
            }
        }
    }

    fn set_draining(&self, id: u32, epoch: u64) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(id as usize) {
            if slot.epoch == epoch && slot.status == WorkerStatus::Busy {
                slot.status = WorkerStatus::Draining;
            }
        }
    }

    fn release_draining(&self, id: u32, epoch: u64) {
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(id as usize) {
                if slot.epoch == epoch && slot.status == WorkerStatus::Draining {
                    slot.status = WorkerStatus::Ready;
                    slot.busy_deadline = None;
                }
            }
        }
        self.wake_one_waiter();
    }

    fn mark_ready(&self, id: u32, epoch: u64) {
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(id as usize) {
                if slot.epoch == epoch && slot.status == WorkerStatus::Starting {
                    slot.status = WorkerStatus::Ready;
                }
            }
        }
        self.wake_one_waiter();
    }

    fn kill_slot(&self, id: u32, epoch: u64) {
        self.kill_slot_with(id, epoch, KillReason::Unhealthy);
    }

    fn kill_slot_with(&self, id: u32, epoch: u64, reason: KillReason) {
        let tx = {
            let slots = self.slots.lock().unwrap();
            slots.get(id as usize).and_then(|slot| {
                (slot.epoch == epoch)
                    .then(|| slot.kill_tx.clone())
                    .flatten()
            })
        };
        if let Some(tx) = tx {
            let _ = tx.send(reason);
        }
    }

    fn kill_all_children(&self) {
        let kill_txs: Vec<_> = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .iter_mut()
                .filter_map(|slot| slot.kill_tx.take())
                .collect()
        };
        for tx in kill_txs {
            let _ = tx.send(KillReason::Shutdown);
        }
    }

    fn wake_one_waiter(&self) {
        // skip waiters whose caller already gave up
        let mut waiters = self.waiters.lock().unwrap();
        while let Some(tx) = waiters.pop_front() {
            if tx.send(()).is_ok() {
                break;
            }
        }
    }

    fn wake_all_waiters(&self) {
        let waiters: Vec<_> = self.waiters.lock().unwrap().drain(..).collect();
        for tx in waiters {
            let _ = tx.send(());
        }
    }
}

/// Receive from an optional channel; a `None` channel never yields. The
/// channel is cleared after it reports closure so the caller sees the
/// closure exactly once.
async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    let Some(channel) = rx.as_mut() else {
        return std::future::pending().await;
    };
    let value = channel.recv().await;
    if value.is_none() {
        *rx = None;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(config: ConversionConfig) -> WorkerPool {
        WorkerPool::new(config)
    }

    #[tokio::test]
    async fn execute_before_start_is_rejected() {
        let pool = test_pool(ConversionConfig::default());
        let err = pool
            .execute(ConversionSettings::default(), ExecuteOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Startup(_)));
    }

    #[tokio::test]
    async fn kill_before_start_leaves_the_pool_stopped() {
        let pool = test_pool(ConversionConfig::default());
        pool.kill().await;
        assert!(!pool.is_started());
    }

    #[tokio::test]
    async fn execute_after_kill_reports_stopped() {
        let pool = test_pool(ConversionConfig::default());
        pool.kill().await;
        let err = pool
            .execute(ConversionSettings::default(), ExecuteOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Stopped));
    }

    #[tokio::test]
    async fn start_fails_without_a_worker_executable() {
        let mut config = ConversionConfig::default();
        config.engine.worker_executable =
            Some(std::path::PathBuf::from("/nonexistent/pagepress-worker"));
        config.pool.start_timeout = Duration::from_millis(500);
        let pool = test_pool(config);
        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, PoolError::Startup(_)));
    }

    #[tokio::test]
    async fn worker_stats_reflect_vacant_slots_before_start() {
        let pool = test_pool(ConversionConfig::default());
        assert!(pool.worker_stats().is_empty());
    }
}
