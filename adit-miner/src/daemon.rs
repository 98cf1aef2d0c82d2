//! Daemon lifecycle management for adit-miner.
//!
//! This module handles the core daemon functionality including wiring the
//! pool manager to the worker, signal handling, and graceful shutdown.

use std::time::Duration;

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::Config;
use crate::pool::{PoolManager, SimulateFactory};
use crate::tracing::prelude::*;
use crate::worker::{DummyWorker, HashRate, WorkerEvent};

/// Interval between periodic status log lines.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon.
pub struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        // The manager cancels this token when rotation runs out of
        // endpoints; we treat it like an external termination request.
        let exit = CancellationToken::new();

        let (_worker_tx, worker_rx) = mpsc::channel::<WorkerEvent>(16);
        let worker = DummyWorker::new(HashRate::from_gigahashes(config.worker.hash_rate_ghs));

        let manager = PoolManager::spawn(
            config.manager.settings(),
            Box::new(SimulateFactory),
            Box::new(worker),
            worker_rx,
            exit.clone(),
        );

        for uri in &config.pools {
            manager.add_connection(uri).await?;
            info!(uri = %uri, "Added pool connection");
        }
        manager.start().await?;

        // Periodic status line while mining
        self.tracker.spawn({
            let manager = manager.clone();
            let shutdown = self.shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(STATUS_INTERVAL) => {
                            if manager.is_running() {
                                info!(
                                    epoch = manager.current_epoch(),
                                    difficulty = format!("{:.3e}", manager.pool_difficulty()),
                                    switches = manager.connection_switches(),
                                    "Status"
                                );
                            }
                        }
                    }
                }
            }
        });
        self.tracker.close();

        info!("Started.");

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        // Wait for a shutdown cause
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            },
            _ = exit.cancelled() => {
                info!("Pool manager ran out of connections");
            },
        }

        // Initiate shutdown
        self.shutdown.cancel();
        if let Err(e) = manager.stop().await {
            warn!(error = %e, "Pool manager did not stop cleanly");
        }

        // Wait for all tasks to complete
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}
