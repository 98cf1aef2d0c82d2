//! In-process simulated pool.
//!
//! The simulator plays the pool side of the client contract without any
//! network: connecting spawns a session task that emits work packages
//! synthesized from a fixed block height, and submitted solutions are
//! acknowledged after a short artificial round-trip. Used for benchmarking
//! and for running the daemon without a real pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::pool::client::{ClientBinding, ClientEvent, ClientFactory, PoolClient};
use crate::pool::endpoint::{Endpoint, ProtocolFamily};
use crate::pool::work::{
    boundary_difficulty, seed_for_epoch, Hash256, Solution, WorkPackage, BLOCKS_PER_EPOCH,
};
use crate::pool::PoolSettings;
use crate::tracing::prelude::*;
use crate::worker::HashRate;

/// Interval between freshly synthesized work packages.
const WORK_INTERVAL: Duration = Duration::from_secs(10);

/// Pretend round-trip for solution acknowledgements.
const SHARE_ROUNDTRIP: Duration = Duration::from_millis(10);

/// A pool client backed by no pool at all.
pub struct SimulateClient {
    binding: ClientBinding,
    endpoint: Option<Arc<Endpoint>>,
    block: u64,
    connected: Arc<AtomicBool>,
    session: CancellationToken,
}

impl SimulateClient {
    pub fn new(block: u64, binding: ClientBinding) -> Self {
        Self {
            binding,
            endpoint: None,
            block,
            connected: Arc::new(AtomicBool::new(false)),
            session: CancellationToken::new(),
        }
    }

    /// Synthesize the `counter`-th work package for a block height.
    fn make_work(block: u64, counter: u64) -> WorkPackage {
        let mut input = [0u8; 16];
        input[..8].copy_from_slice(&block.to_le_bytes());
        input[8..].copy_from_slice(&counter.to_le_bytes());

        // Sixteen leading zero bits: roughly 65k hashes per solution.
        let mut boundary = [0xffu8; 32];
        boundary[0] = 0;
        boundary[1] = 0;
        let boundary = Hash256(boundary);

        WorkPackage {
            header: Hash256::keccak(&input),
            job: format!("sim-{}", counter),
            epoch: -1,
            seed: seed_for_epoch((block / BLOCKS_PER_EPOCH as u64) as u32),
            boundary,
            block: block as i64,
            difficulty: boundary_difficulty(&boundary),
        }
    }
}

impl PoolClient for SimulateClient {
    fn set_connection(&mut self, endpoint: Arc<Endpoint>) {
        self.endpoint = Some(endpoint);
    }

    fn unset_connection(&mut self) {
        self.endpoint = None;
    }

    fn connect(&mut self) {
        self.session = CancellationToken::new();
        let token = self.session.clone();
        let connected = self.connected.clone();
        let binding = self.binding.clone();
        let block = self.block;

        tokio::spawn(async move {
            connected.store(true, Ordering::Release);
            binding.emit(ClientEvent::Connected).await;

            let mut counter = 0u64;
            loop {
                counter += 1;
                let work = Self::make_work(block, counter);
                binding.emit(ClientEvent::WorkReceived(work)).await;

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(WORK_INTERVAL) => {}
                }
            }
        });
    }

    fn disconnect(&mut self) {
        self.session.cancel();
        self.connected.store(false, Ordering::Release);

        let binding = self.binding.clone();
        tokio::spawn(async move {
            binding.emit(ClientEvent::Disconnected).await;
        });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn connection(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    fn submit_solution(&mut self, solution: Solution) {
        let binding = self.binding.clone();
        tokio::spawn(async move {
            sleep(SHARE_ROUNDTRIP).await;
            binding
                .emit(ClientEvent::SolutionAccepted {
                    elapsed: SHARE_ROUNDTRIP,
                    miner_index: solution.miner_index,
                    stale: solution.stale,
                })
                .await;
        });
    }

    fn submit_hashrate(&mut self, rate: HashRate, id: &str) {
        debug!(rate = %rate, id = %id, "Simulated pool swallowed hashrate report");
    }
}

/// Factory for deployments that only carry the simulator.
pub struct SimulateFactory;

impl ClientFactory for SimulateFactory {
    fn build(
        &self,
        family: ProtocolFamily,
        settings: &PoolSettings,
        binding: ClientBinding,
    ) -> crate::Result<Box<dyn PoolClient>> {
        match family {
            ProtocolFamily::Simulation => Ok(Box::new(SimulateClient::new(
                settings.benchmark_block,
                binding,
            ))),
            other => Err(Error::UnsupportedProtocol(other)),
        }
    }
}
