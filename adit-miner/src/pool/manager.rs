//! Pool connection manager.
//!
//! One live session at a time, drawn from the ordered endpoint registry.
//! Connection loss rotates through alternatives with bounded retries and
//! optional delays; running on a fallback arms a failover timer that
//! eventually returns to the preferred endpoint. The worker is started,
//! paused, resumed, and stopped in lock-step with the session.
//!
//! The manager is a single task: client events, worker events, control
//! commands, and timer expiries are multiplexed onto one `select!` loop, so
//! every state transition is serialized without locks. The [`PoolManager`]
//! handle posts commands onto that loop and reads the atomically shared
//! flags and counters directly.
//!
//! Conceptually the task moves through Idle (spawned, nothing posted),
//! Connecting (a rotation is in flight), Connected, Stopping (drain after a
//! stop request), and Terminated (no viable endpoint left; the injected
//! termination token is cancelled so a supervisor can tear the process
//! down).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pool::client::{ClientBinding, ClientEvent, ClientFactory, PoolClient};
use crate::pool::endpoint::{ConnectionEntry, Endpoint, Registry};
use crate::pool::timer::{TimerKind, TimerSet};
use crate::pool::work::{
    boundary_difficulty, epoch_for_seed, Hash256, Solution, WorkPackage, BLOCKS_PER_EPOCH,
};
use crate::pool::PoolSettings;
use crate::tracing::prelude::*;
use crate::worker::{Worker, WorkerEvent};

/// How often `stop()` polls for the drain to complete.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Total time `stop()` waits for the client to raise its disconnect before
/// giving up with [`Error::StopTimeout`].
const STOP_WAIT_MAX: Duration = Duration::from_secs(60);

const CONTROL_QUEUE: usize = 16;
const EVENT_QUEUE: usize = 64;

/// Flags and counters shared between the handle and the manager task.
struct Shared {
    running: AtomicBool,
    stopping: AtomicBool,
    /// Control-operation interlock: claimed by whoever initiates an
    /// externally visible async operation, released by the callback that
    /// completes it.
    async_pending: AtomicBool,
    connection_switches: AtomicU64,
    epoch_changes: AtomicU64,
    work: Mutex<WorkStatus>,
}

/// Introspection mirror of the current work package.
#[derive(Clone, Copy)]
struct WorkStatus {
    epoch: i32,
    difficulty: f64,
    has_work: bool,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            async_pending: AtomicBool::new(false),
            connection_switches: AtomicU64::new(0),
            epoch_changes: AtomicU64::new(0),
            work: Mutex::new(WorkStatus {
                epoch: -1,
                difficulty: 0.0,
                has_work: false,
            }),
        }
    }
}

enum Control {
    Start,
    Stop { reply: oneshot::Sender<StopOutcome> },
    Add { endpoint: Arc<Endpoint>, reply: oneshot::Sender<()> },
    Remove { index: usize, reply: oneshot::Sender<Result<()>> },
    Select { target: SelectTarget, reply: oneshot::Sender<Result<()>> },
    Snapshot { reply: oneshot::Sender<Vec<ConnectionEntry>> },
    Active { reply: oneshot::Sender<Option<String>> },
}

enum SelectTarget {
    Index(usize),
    Uri(String),
}

enum StopOutcome {
    /// A disconnect was initiated; the caller polls `running` until clear
    Draining,
    /// No live connection; stop acted locally and completed
    Inactive,
}

/// Cloneable control handle for the manager task.
#[derive(Clone)]
pub struct PoolManager {
    ctrl: mpsc::Sender<Control>,
    shared: Arc<Shared>,
}

impl PoolManager {
    /// Spawn the manager task and return its handle.
    ///
    /// `exit` is cancelled when rotation exhausts its options (empty
    /// registry or the `exit` sentinel endpoint); the caller decides what
    /// process-level teardown that triggers.
    pub fn spawn(
        settings: PoolSettings,
        factory: Box<dyn ClientFactory>,
        worker: Box<dyn Worker>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
        exit: CancellationToken,
    ) -> PoolManager {
        let shared = Arc::new(Shared::new());
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_QUEUE);
        let task = ManagerTask::new(
            settings,
            shared.clone(),
            factory,
            worker,
            ctrl_rx,
            worker_rx,
            exit,
        );
        tokio::spawn(task.run());
        PoolManager {
            ctrl: ctrl_tx,
            shared,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Begin connecting to the active endpoint.
    pub async fn start(&self) -> Result<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        self.shared.stopping.store(false, Ordering::Release);
        self.shared.async_pending.store(true, Ordering::Release);
        self.shared
            .connection_switches
            .fetch_add(1, Ordering::Relaxed);
        self.send(Control::Start).await
    }

    /// Stop the manager, draining the active connection.
    ///
    /// When a connection is live this blocks until the client raises its
    /// disconnect, polling at [`STOP_POLL_INTERVAL`] and giving up after
    /// [`STOP_WAIT_MAX`]. From an inactive state (no live connection) the
    /// stop only cancels timers and halts a mining worker.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.shared.async_pending.store(true, Ordering::Release);
        self.shared.stopping.store(true, Ordering::Release);

        let (tx, rx) = oneshot::channel();
        self.send(Control::Stop { reply: tx }).await?;
        match rx.await.map_err(|_| Error::Terminated)? {
            StopOutcome::Inactive => Ok(()),
            StopOutcome::Draining => {
                let mut waited = Duration::ZERO;
                while self.shared.running.load(Ordering::Acquire) {
                    if waited >= STOP_WAIT_MAX {
                        return Err(Error::StopTimeout(STOP_WAIT_MAX));
                    }
                    sleep(STOP_POLL_INTERVAL).await;
                    waited += STOP_POLL_INTERVAL;
                }
                Ok(())
            }
        }
    }

    /// Append an endpoint to the registry.
    pub async fn add_connection(&self, uri: &str) -> Result<()> {
        let endpoint = Arc::new(Endpoint::parse(uri)?);
        let (tx, rx) = oneshot::channel();
        self.send(Control::Add {
            endpoint,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// Remove the endpoint at `index`. Fails for the active endpoint, an
    /// out-of-range index, or while an async operation is outstanding.
    pub async fn remove_connection(&self, index: usize) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Remove { index, reply: tx }).await?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    /// Make the endpoint at `index` the active one, disconnecting the
    /// current session so reconnection targets the new selection.
    pub async fn set_active_connection(&self, index: usize) -> Result<()> {
        self.select(SelectTarget::Index(index)).await
    }

    /// Like [`Self::set_active_connection`], selecting by canonical URI
    /// (case-insensitive).
    pub async fn set_active_connection_by_uri(&self, uri: &str) -> Result<()> {
        self.select(SelectTarget::Uri(uri.to_string())).await
    }

    async fn select(&self, target: SelectTarget) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Select { target, reply: tx }).await?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    /// URI of the active endpoint, if any.
    pub async fn active_connection(&self) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Active { reply: tx }).await?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// `(index, active, uri)` rows for every configured endpoint.
    pub async fn connections(&self) -> Result<Vec<ConnectionEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Snapshot { reply: tx }).await?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// The registry snapshot as a JSON array.
    pub async fn connections_json(&self) -> Result<serde_json::Value> {
        let entries = self.connections().await?;
        Ok(serde_json::to_value(entries).unwrap_or(serde_json::Value::Null))
    }

    pub fn current_epoch(&self) -> i32 {
        self.shared.work.lock().unwrap().epoch
    }

    /// Difficulty of the current work, 0.0 while no work is held.
    pub fn pool_difficulty(&self) -> f64 {
        let status = *self.shared.work.lock().unwrap();
        if status.has_work {
            status.difficulty
        } else {
            0.0
        }
    }

    pub fn connection_switches(&self) -> u64 {
        self.shared.connection_switches.load(Ordering::Relaxed)
    }

    pub fn epoch_changes(&self) -> u64 {
        self.shared.epoch_changes.load(Ordering::Relaxed)
    }

    async fn send(&self, control: Control) -> Result<()> {
        self.ctrl.send(control).await.map_err(|_| Error::Terminated)
    }
}

/// The manager task: sole owner of registry, client, worker, and timers.
struct ManagerTask {
    settings: PoolSettings,
    shared: Arc<Shared>,
    registry: Registry,
    /// Connection attempts against the current endpoint
    attempts: u32,
    client: Option<Box<dyn PoolClient>>,
    /// Generation of the client currently owned; older events are stale
    generation: u64,
    factory: Box<dyn ClientFactory>,
    worker: Box<dyn Worker>,
    current: WorkPackage,
    selected_host: String,
    timers: TimerSet,
    events_tx: mpsc::Sender<(u64, ClientEvent)>,
    events_rx: mpsc::Receiver<(u64, ClientEvent)>,
    ctrl_rx: mpsc::Receiver<Control>,
    worker_rx: mpsc::Receiver<WorkerEvent>,
    exit: CancellationToken,
}

impl ManagerTask {
    fn new(
        settings: PoolSettings,
        shared: Arc<Shared>,
        factory: Box<dyn ClientFactory>,
        worker: Box<dyn Worker>,
        ctrl_rx: mpsc::Receiver<Control>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
        exit: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            settings,
            shared,
            registry: Registry::new(),
            attempts: 0,
            client: None,
            generation: 0,
            factory,
            worker,
            current: WorkPackage::default(),
            selected_host: String::new(),
            timers: TimerSet::new(),
            events_tx,
            events_rx,
            ctrl_rx,
            worker_rx,
            exit,
        }
    }

    /// Main event loop. Exits when every handle has been dropped.
    async fn run(mut self) {
        loop {
            tokio::select! {
                maybe = self.ctrl_rx.recv() => match maybe {
                    Some(control) => self.handle_control(control),
                    None => break,
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.handle_client_event(generation, event);
                }
                Some(event) = self.worker_rx.recv() => {
                    self.handle_worker_event(event);
                }
                kind = self.timers.expired() => self.handle_timer(kind),
            }
        }
        trace!("Pool manager task stopped.");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Start => self.rotate_connect(),
            Control::Stop { reply } => {
                let outcome = if self.client.as_ref().is_some_and(|c| c.is_connected()) {
                    if let Some(client) = self.client.as_mut() {
                        client.disconnect();
                    }
                    StopOutcome::Draining
                } else {
                    self.timers.cancel_all();
                    if self.worker.is_mining() {
                        info!("Shutting down miners...");
                        self.worker.stop();
                    }
                    StopOutcome::Inactive
                };
                let _ = reply.send(outcome);
            }
            Control::Add { endpoint, reply } => {
                self.registry.add(endpoint);
                let _ = reply.send(());
            }
            Control::Remove { index, reply } => {
                let _ = reply.send(self.remove_connection(index));
            }
            Control::Select { target, reply } => {
                let _ = reply.send(self.select_connection(target));
            }
            Control::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Control::Active { reply } => {
                let _ = reply.send(self.registry.active().map(|e| e.uri().to_string()));
            }
        }
    }

    fn remove_connection(&mut self, index: usize) -> Result<()> {
        if self.shared.async_pending.load(Ordering::Acquire) {
            return Err(Error::Busy);
        }
        if index >= self.registry.len() {
            return Err(Error::IndexOutOfBounds);
        }
        if index == self.registry.active_index() {
            return Err(Error::RemoveActive);
        }
        self.registry.remove(index);
        if self.registry.active_index() > index {
            self.registry
                .set_active_index(self.registry.active_index() - 1);
        }
        Ok(())
    }

    fn select_connection(&mut self, target: SelectTarget) -> Result<()> {
        let index = match target {
            SelectTarget::Index(index) => {
                if index >= self.registry.len() {
                    return Err(Error::IndexOutOfBounds);
                }
                index
            }
            SelectTarget::Uri(uri) => self
                .registry
                .find_by_uri(&uri)
                .ok_or(Error::UnknownConnection)?,
        };

        if self
            .shared
            .async_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        if index == self.registry.active_index() {
            self.shared.async_pending.store(false, Ordering::Release);
            return Ok(());
        }

        self.shared
            .connection_switches
            .fetch_add(1, Ordering::Relaxed);
        self.registry.set_active_index(index);
        self.attempts = 0;
        match self.client.as_mut() {
            // The disconnect path drives reconnection to the new selection
            Some(client) => client.disconnect(),
            None => self.shared.async_pending.store(false, Ordering::Release),
        }
        Ok(())
    }

    fn handle_client_event(&mut self, generation: u64, event: ClientEvent) {
        if generation != self.generation {
            trace!(generation, "Dropping event from a discarded client");
            return;
        }
        match event {
            ClientEvent::Connected => self.on_connected(),
            ClientEvent::Disconnected => self.on_disconnected(),
            ClientEvent::WorkReceived(work) => self.on_work_received(work),
            ClientEvent::SolutionAccepted {
                elapsed,
                miner_index,
                stale,
            } => {
                info!(
                    host = %self.selected_host,
                    miner = miner_index,
                    stale,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Solution accepted"
                );
            }
            ClientEvent::SolutionRejected {
                elapsed,
                miner_index,
            } => {
                warn!(
                    host = %self.selected_host,
                    miner = miner_index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Solution rejected"
                );
            }
        }
    }

    fn on_connected(&mut self) {
        info!(host = %self.selected_host, "Connected.");
        self.attempts = 0;

        self.current.job.clear();
        self.current.header = Hash256::ZERO;
        self.publish_work_status();

        if self.registry.active_index() != 0 && !self.settings.failover_timeout.is_zero() {
            self.timers
                .arm(TimerKind::Failover, self.settings.failover_timeout);
        } else {
            self.timers.cancel(TimerKind::Failover);
        }

        if !self.worker.is_mining() {
            info!("Spinning up miners...");
            self.worker.start();
        } else if self.worker.is_paused() {
            info!("Resuming mining...");
            self.worker.resume();
        }

        if self.settings.report_hashrate {
            self.timers
                .arm(TimerKind::HashrateReport, self.settings.hashrate_interval);
        }

        self.shared.async_pending.store(false, Ordering::Release);
    }

    fn on_disconnected(&mut self) {
        info!(host = %self.selected_host, "Disconnected.");

        if let Some(client) = self.client.as_mut() {
            client.unset_connection();
        }
        self.current.header = Hash256::ZERO;
        self.publish_work_status();

        self.timers.cancel(TimerKind::Failover);
        self.timers.cancel(TimerKind::HashrateReport);

        if self.shared.stopping.load(Ordering::Acquire) {
            if self.worker.is_mining() {
                info!("Shutting down miners...");
                self.worker.stop();
            }
            self.timers.cancel_all();
            self.client = None;
            self.shared.running.store(false, Ordering::Release);
        } else {
            self.shared.async_pending.store(true, Ordering::Release);
            info!("No connection. Suspending mining...");
            self.worker.pause();
            self.rotate_connect();
        }
    }

    fn on_work_received(&mut self, work: WorkPackage) {
        if work.is_empty() {
            return;
        }

        let previous_epoch = self.current.epoch;
        let mut new_epoch = previous_epoch == -1;
        if !new_epoch {
            // The stratum-v2 dialect pins the epoch in the session, so the
            // package's epoch value is authoritative; everywhere else an
            // epoch change shows up as a new seed hash.
            let session_epochs = self
                .client
                .as_ref()
                .is_some_and(|c| c.stratum_mode().session_carries_epoch());
            new_epoch = if session_epochs {
                work.epoch != self.current.epoch
            } else {
                work.seed != self.current.seed
            };
        }
        let new_diff = work.boundary != self.current.boundary;

        self.current = work;

        if new_epoch {
            self.shared.epoch_changes.fetch_add(1, Ordering::Relaxed);
            if self.current.epoch == -1 {
                self.current.epoch = if self.current.block >= 0 {
                    (self.current.block / BLOCKS_PER_EPOCH) as i32
                } else {
                    epoch_for_seed(&self.current.seed)
                        .map(|e| e as i32)
                        .unwrap_or(-1)
                };
            }
        } else {
            self.current.epoch = previous_epoch;
        }
        self.publish_work_status();

        if new_epoch || new_diff {
            info!(
                epoch = self.current.epoch,
                difficulty = format!("{:.3e}", boundary_difficulty(&self.current.boundary)),
                "Mining on new target"
            );
        }

        self.worker.set_work(&self.current);
    }

    /// Forward a found solution, or drop it when no connection is live.
    /// Always returns false: the worker must not retain the solution.
    fn on_solution_found(&mut self, solution: Solution) -> bool {
        match self.client.as_mut() {
            Some(client) if client.is_connected() => client.submit_solution(solution),
            _ => {
                info!(
                    nonce = format!("{:#018x}", solution.nonce),
                    "Solution wasted. Waiting for connection..."
                );
            }
        }
        false
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::MinerRestart => {
                info!("Restarting miners...");
                if self.worker.is_mining() {
                    self.worker.stop();
                }
                self.worker.start();
            }
            WorkerEvent::SolutionFound(solution) => {
                self.on_solution_found(solution);
            }
        }
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Failover => self.on_failover_elapsed(),
            TimerKind::HashrateReport => self.on_hashrate_elapsed(),
            TimerKind::RetryDelay => self.on_retry_elapsed(),
        }
    }

    fn on_failover_elapsed(&mut self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        if self.registry.active_index() == 0 {
            return;
        }
        self.registry.set_active_index(0);
        self.attempts = 0;
        self.shared
            .connection_switches
            .fetch_add(1, Ordering::Relaxed);
        info!("Failover timeout reached, retrying connection to primary pool");
        if let Some(client) = self.client.as_mut() {
            client.disconnect();
        }
    }

    fn on_hashrate_elapsed(&mut self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        if let Some(client) = self.client.as_mut() {
            if client.is_connected() {
                client.submit_hashrate(self.worker.hash_rate(), &self.settings.hashrate_id);
            }
        }
        self.timers
            .arm(TimerKind::HashrateReport, self.settings.hashrate_interval);
    }

    fn on_retry_elapsed(&mut self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        if let Some(client) = self.client.as_mut() {
            if !client.is_connected() {
                client.connect();
            }
        }
    }

    /// Select the next viable endpoint and begin connecting to it.
    ///
    /// No-op while a connection is live. Unrecoverable endpoints are removed
    /// without counting against their retry allowance; a sole endpoint that
    /// has exhausted its retries is removed outright. When nothing viable
    /// remains, or the `exit` sentinel comes up, the manager goes terminal.
    fn rotate_connect(&mut self) {
        if self.client.as_ref().is_some_and(|c| c.is_connected()) {
            return;
        }

        loop {
            self.registry.clamp_active();

            match self.registry.active().map(|e| e.is_unrecoverable()) {
                Some(true) => {
                    let removed = self.registry.remove(self.registry.active_index());
                    warn!(uri = %removed.uri(), "Discarding unrecoverable connection");
                    self.attempts = 0;
                    self.registry.clamp_active();
                    self.shared
                        .connection_switches
                        .fetch_add(1, Ordering::Relaxed);
                }
                Some(false)
                    if self.registry.len() == 1
                        && self.settings.max_retries > 0
                        && self.attempts >= self.settings.max_retries =>
                {
                    // The only endpoint left; there is nothing to rotate to.
                    let removed = self.registry.remove(self.registry.active_index());
                    info!(uri = %removed.uri(), "Sole connection exhausted its retries");
                }
                _ => {}
            }

            if !self.registry.is_empty()
                && self.settings.max_retries > 0
                && self.attempts >= self.settings.max_retries
            {
                self.attempts = 0;
                self.registry.advance_active();
                self.shared
                    .connection_switches
                    .fetch_add(1, Ordering::Relaxed);
            }

            let endpoint = match self.registry.active() {
                Some(endpoint) if !endpoint.is_exit() => endpoint.clone(),
                maybe_exit => {
                    if maybe_exit.is_none() {
                        info!("No more connections to try. Exiting...");
                    } else {
                        info!("'exit' failover just got hit. Exiting...");
                    }
                    if self.worker.is_mining() {
                        info!("Shutting down miners...");
                        self.worker.stop();
                    }
                    self.timers.cancel_all();
                    self.shared.running.store(false, Ordering::Release);
                    self.exit.cancel();
                    return;
                }
            };

            self.client = None;
            self.generation += 1;
            let binding = ClientBinding::new(self.generation, self.events_tx.clone());
            let mut client =
                match self
                    .factory
                    .build(endpoint.family(), &self.settings, binding)
                {
                    Ok(client) => client,
                    Err(e) => {
                        error!(uri = %endpoint.uri(), error = %e, "No client for endpoint");
                        endpoint.mark_unrecoverable();
                        continue;
                    }
                };

            self.attempts += 1;
            self.selected_host = endpoint.display_host();
            client.set_connection(endpoint);
            debug!(
                host = %self.selected_host,
                attempt = self.attempts,
                "Selected pool connection"
            );

            if self.attempts > 1 && !self.settings.retry_delay.is_zero() {
                info!(
                    delay_secs = self.settings.retry_delay.as_secs(),
                    "Next connection attempt delayed"
                );
                self.client = Some(client);
                self.timers
                    .arm(TimerKind::RetryDelay, self.settings.retry_delay);
            } else {
                client.connect();
                self.client = Some(client);
            }
            return;
        }
    }

    fn publish_work_status(&self) {
        let mut status = self.shared.work.lock().unwrap();
        status.epoch = self.current.epoch;
        status.difficulty = self.current.difficulty;
        status.has_work = !self.current.header.is_zero();
    }
}
