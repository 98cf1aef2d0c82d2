//! adit-miner: a mining daemon built around a failover-aware pool
//! connection manager.
//!
//! The heart of the crate is [`pool::PoolManager`], which keeps exactly one
//! live pool session at a time, rotates through configured endpoints on
//! connection loss, fails back to the preferred endpoint after a timeout,
//! and drives the [`worker::Worker`] lifecycle in lock-step with the
//! session. Everything else (configuration, the daemon shell, the
//! simulated pool) exists to run and exercise that manager.

pub mod config;
pub mod daemon;
pub mod error;
pub mod pool;
pub mod tracing;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use pool::{PoolManager, PoolSettings};
