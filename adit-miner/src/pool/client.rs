//! Pool client contract and the event binding between clients and manager.
//!
//! Concrete clients (stratum TCP, getwork polling, the in-process simulator)
//! implement [`PoolClient`] and report lifecycle changes through the
//! [`ClientBinding`] they receive at construction. The binding tags every
//! event with the generation of the client that produced it, so the manager
//! can discard events from a client it has already replaced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::pool::endpoint::{Endpoint, ProtocolFamily};
use crate::pool::work::{Solution, WorkPackage};
use crate::pool::PoolSettings;
use crate::worker::HashRate;

/// Events emitted by a pool client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The session is established and work may arrive
    Connected,

    /// The session is gone; the manager decides whether to rotate or stop
    Disconnected,

    /// New work from the pool
    WorkReceived(WorkPackage),

    /// The pool accepted a submitted solution
    SolutionAccepted {
        elapsed: Duration,
        miner_index: usize,
        stale: bool,
    },

    /// The pool rejected a submitted solution
    SolutionRejected {
        elapsed: Duration,
        miner_index: usize,
    },
}

/// Stratum dialect negotiated by a client session.
///
/// Only [`StratumMode::V2`] matters to the manager: that dialect pins the
/// epoch number in the session handshake, so work packages signal an epoch
/// change through an explicit epoch value instead of a new seed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumMode {
    /// Plain stratum
    Standard,
    /// eth-proxy compatible
    EthProxy,
    /// EthereumStratum/1.0.0
    NiceHash,
    /// EthereumStratum/2.0.0, with the epoch carried in the session
    V2,
}

impl StratumMode {
    /// Whether work packages of this dialect carry a session-scoped epoch.
    pub fn session_carries_epoch(self) -> bool {
        matches!(self, StratumMode::V2)
    }
}

/// Generation-tagged event channel handed to each freshly built client.
///
/// Clients clone the binding into their I/O tasks and emit through it; the
/// manager drops anything tagged with a generation older than the client it
/// currently owns.
#[derive(Debug, Clone)]
pub struct ClientBinding {
    generation: u64,
    tx: mpsc::Sender<(u64, ClientEvent)>,
}

impl ClientBinding {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<(u64, ClientEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward an event to the manager. Send failures mean the manager is
    /// gone, in which case there is nobody left to tell.
    pub async fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send((self.generation, event)).await;
    }
}

/// Contract the manager consumes from every pool client variant.
///
/// `connect` and `disconnect` only initiate the transition; the outcome
/// arrives as a [`ClientEvent`] through the binding.
pub trait PoolClient: Send {
    fn set_connection(&mut self, endpoint: Arc<Endpoint>);
    fn unset_connection(&mut self);
    fn connect(&mut self);
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn connection(&self) -> Option<&Arc<Endpoint>>;

    /// Dialect of the live session; non-stratum clients report `Standard`.
    fn stratum_mode(&self) -> StratumMode {
        StratumMode::Standard
    }

    fn submit_solution(&mut self, solution: Solution);
    fn submit_hashrate(&mut self, rate: HashRate, id: &str);
}

/// Builds the client variant matching an endpoint's protocol family.
pub trait ClientFactory: Send {
    fn build(
        &self,
        family: ProtocolFamily,
        settings: &PoolSettings,
        binding: ClientBinding,
    ) -> crate::Result<Box<dyn PoolClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_v2_carries_session_epoch() {
        assert!(StratumMode::V2.session_carries_epoch());
        assert!(!StratumMode::Standard.session_carries_epoch());
        assert!(!StratumMode::EthProxy.session_carries_epoch());
        assert!(!StratumMode::NiceHash.session_carries_epoch());
    }

    #[tokio::test]
    async fn test_binding_tags_events_with_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let binding = ClientBinding::new(7, tx);

        binding.emit(ClientEvent::Connected).await;

        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, ClientEvent::Connected));
    }

    #[tokio::test]
    async fn test_binding_emit_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let binding = ClientBinding::new(1, tx);
        // Must not panic or error; the manager is simply gone.
        binding.emit(ClientEvent::Disconnected).await;
    }
}
