//! Common error types for adit-miner.
//!
//! This module provides a centralized Error enum using thiserror. Control
//! surface preconditions get their own variants so callers can react to a
//! specific failure instead of string-matching.

use std::time::Duration;

use thiserror::Error;

use crate::pool::endpoint::ProtocolFamily;

/// Main error type for adit-miner operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A pool URI that could not be parsed into an endpoint
    #[error("invalid pool URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Connection index past the end of the registry
    #[error("connection index out of bounds")]
    IndexOutOfBounds,

    /// The active connection cannot be removed
    #[error("can't remove active connection")]
    RemoveActive,

    /// No configured connection matches the given URI
    #[error("no connection matches the given URI")]
    UnknownConnection,

    /// A control operation is already in flight; retry with backoff
    #[error("outstanding operations, retry")]
    Busy,

    /// start() called while the manager is running
    #[error("pool manager is already running")]
    AlreadyRunning,

    /// The manager task is gone; no further operations are possible
    #[error("pool manager has terminated")]
    Terminated,

    /// The active client never raised its disconnect during stop()
    #[error("client failed to disconnect within {0:?}")]
    StopTimeout(Duration),

    /// No client implementation was compiled in for this protocol family
    #[error("no client implementation for protocol family {0}")]
    UnsupportedProtocol(ProtocolFamily),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
