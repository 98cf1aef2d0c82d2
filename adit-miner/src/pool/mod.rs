//! Mining pool connectivity.
//!
//! This module maintains a single live session with one pool at a time,
//! drawn from an ordered list of configured endpoints. The
//! [`PoolManager`] drives the worker's lifecycle in lock-step with that
//! session and recovers from connection loss by rotating through
//! alternatives with bounded retries, delays, and eventual failback to the
//! preferred endpoint.
//!
//! # Architecture
//!
//! The manager is a single spawned task that owns the endpoint registry,
//! the active client, and the timer set. Clients are **active async tasks**
//! that push [`client::ClientEvent`]s to the manager via message passing;
//! external callers talk to the manager through the cloneable
//! [`PoolManager`] handle, which posts commands onto the same task. All
//! state mutation happens inside the task, so no lock guards manager state.

pub mod client;
pub mod endpoint;
pub mod manager;
pub mod simulate;
pub mod timer;
pub mod work;

pub use client::{ClientBinding, ClientEvent, ClientFactory, PoolClient, StratumMode};
pub use endpoint::{ConnectionEntry, Endpoint, ProtocolFamily, Registry, EXIT_HOST};
pub use manager::PoolManager;
pub use simulate::{SimulateClient, SimulateFactory};
pub use work::{Hash256, Solution, WorkPackage};

use std::time::Duration;

/// Pool manager settings, immutable after construction.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// How long to stay on a fallback before retrying the preferred
    /// endpoint; zero disables failback
    pub failover_timeout: Duration,

    /// Whether to report the worker's hashrate to the pool
    pub report_hashrate: bool,

    /// Interval between hashrate reports
    pub hashrate_interval: Duration,

    /// Opaque identifier sent along with hashrate reports
    pub hashrate_id: String,

    /// Connection attempts per endpoint before rotating to the next one;
    /// zero disables rotation on attempt count
    pub max_retries: u32,

    /// Delay before a repeated connection attempt; zero connects immediately
    pub retry_delay: Duration,

    /// Forwarded to clients: give up when no work arrives for this long
    pub no_work_timeout: Duration,

    /// Forwarded to clients: give up when the pool stops responding
    pub no_response_timeout: Duration,

    /// Forwarded to getwork clients: work polling interval
    pub getwork_poll_interval: Duration,

    /// Block height the simulated pool mines at
    pub benchmark_block: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            failover_timeout: Duration::ZERO,
            report_hashrate: false,
            hashrate_interval: Duration::from_secs(60),
            hashrate_id: "adit".to_string(),
            max_retries: 3,
            retry_delay: Duration::ZERO,
            no_work_timeout: Duration::from_secs(180),
            no_response_timeout: Duration::from_secs(2),
            getwork_poll_interval: Duration::from_millis(500),
            benchmark_block: 0,
        }
    }
}
