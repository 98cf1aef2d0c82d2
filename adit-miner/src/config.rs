//! Configuration management for adit-miner.
//!
//! Configuration is loaded from a TOML file and can be overridden from the
//! command line. Everything has a default, so the daemon starts with no
//! configuration at all.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pool::PoolSettings;

/// Main configuration structure for the miner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Pool endpoint URIs in failover order; index 0 is preferred
    pub pools: Vec<String>,

    /// Worker configuration
    pub worker: WorkerConfig,

    /// Pool manager configuration
    pub manager: ManagerConfig,
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Hash rate the stub worker reports, in GH/s
    pub hash_rate_ghs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { hash_rate_ghs: 1.0 }
    }
}

/// Pool manager configuration, mapped onto [`PoolSettings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Minutes to stay on a fallback pool before retrying the preferred
    /// one; 0 disables failback
    pub failover_timeout_minutes: u64,

    /// Report the worker's hashrate to the pool
    pub report_hashrate: bool,

    /// Seconds between hashrate reports
    pub hashrate_interval_secs: u64,

    /// Identifier sent with hashrate reports
    pub hashrate_id: String,

    /// Connection attempts per pool before rotating; 0 retries forever
    pub max_retries: u32,

    /// Seconds to wait before a repeated connection attempt
    pub retry_delay_secs: u64,

    /// Seconds without work before a client gives up the connection
    pub no_work_timeout_secs: u64,

    /// Seconds without responses before a client gives up the connection
    pub no_response_timeout_secs: u64,

    /// Milliseconds between getwork polls
    pub getwork_poll_interval_ms: u64,

    /// Block height for the simulated pool
    pub benchmark_block: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            failover_timeout_minutes: 0,
            report_hashrate: false,
            hashrate_interval_secs: 60,
            hashrate_id: "adit".to_string(),
            max_retries: 3,
            retry_delay_secs: 0,
            no_work_timeout_secs: 180,
            no_response_timeout_secs: 2,
            getwork_poll_interval_ms: 500,
            benchmark_block: 0,
        }
    }
}

impl ManagerConfig {
    /// Convert into the manager's settings struct.
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            failover_timeout: Duration::from_secs(self.failover_timeout_minutes * 60),
            report_hashrate: self.report_hashrate,
            hashrate_interval: Duration::from_secs(self.hashrate_interval_secs),
            hashrate_id: self.hashrate_id.clone(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            no_work_timeout: Duration::from_secs(self.no_work_timeout_secs),
            no_response_timeout: Duration::from_secs(self.no_response_timeout_secs),
            getwork_poll_interval: Duration::from_millis(self.getwork_poll_interval_ms),
            benchmark_block: self.benchmark_block,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}
