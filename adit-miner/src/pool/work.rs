//! Work packages and epoch derivation.
//!
//! A [`WorkPackage`] is the unit of task description a pool hands the worker:
//! header to mine on, seed hash, boundary target, and (when the pool knows
//! them) block height and epoch number. Epochs are coarse windows of
//! [`BLOCKS_PER_EPOCH`] blocks; when a pool omits the epoch it is derived
//! either from the block height or by walking the keccak seed chain.

use std::fmt;
use std::str::FromStr;

use sha3::{Digest, Keccak256};

/// Blocks per epoch window.
pub const BLOCKS_PER_EPOCH: i64 = 30_000;

/// Upper bound for the seed-chain walk in [`epoch_for_seed`].
const MAX_SEED_EPOCH: u32 = 32_640;

/// A 256-bit hash value, displayed as 0x-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, used as the "no work" sentinel header.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Keccak-256 of arbitrary bytes.
    pub fn keccak(data: &[u8]) -> Hash256 {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Hash256(out)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let mut out = [0u8; 32];
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        out.copy_from_slice(&bytes);
        Ok(Hash256(out))
    }
}

/// Seed hash for a given epoch: the keccak-256 chain applied `epoch` times
/// to the zero hash.
pub fn seed_for_epoch(epoch: u32) -> Hash256 {
    let mut seed = Hash256::ZERO;
    for _ in 0..epoch {
        seed = Hash256::keccak(seed.as_bytes());
    }
    seed
}

/// Recover the epoch number from a seed hash by walking the seed chain.
///
/// Returns `None` if the seed does not appear within [`MAX_SEED_EPOCH`]
/// steps, i.e. the pool sent a seed we cannot place.
pub fn epoch_for_seed(seed: &Hash256) -> Option<u32> {
    let mut probe = Hash256::ZERO;
    for epoch in 0..=MAX_SEED_EPOCH {
        if probe == *seed {
            return Some(epoch);
        }
        probe = Hash256::keccak(probe.as_bytes());
    }
    None
}

/// Approximate difficulty implied by a boundary target: the expected number
/// of hashes per solution, `2^256 / boundary`. Display-only precision.
pub fn boundary_difficulty(boundary: &Hash256) -> f64 {
    let mut hi = [0u8; 16];
    hi.copy_from_slice(&boundary.0[..16]);
    let hi = u128::from_be_bytes(hi);
    if hi == 0 {
        return 0.0;
    }
    // 2^256 / boundary == 2^128 / (boundary >> 128), to f64 precision.
    const TWO_POW_128: f64 = 340_282_366_920_938_463_463_374_607_431_768_211_456.0;
    TWO_POW_128 / hi as f64
}

/// Work delivered by a pool.
#[derive(Debug, Clone)]
pub struct WorkPackage {
    /// Header identity to mine on; zero means "no work"
    pub header: Hash256,

    /// Pool-assigned job identifier
    pub job: String,

    /// Epoch number, -1 when the pool did not state one
    pub epoch: i32,

    /// Seed hash identifying the epoch's data set
    pub seed: Hash256,

    /// Boundary target a solution must fall below
    pub boundary: Hash256,

    /// Block height, -1 when unknown
    pub block: i64,

    /// Share difficulty as reported by the pool
    pub difficulty: f64,
}

impl Default for WorkPackage {
    fn default() -> Self {
        Self {
            header: Hash256::ZERO,
            job: String::new(),
            epoch: -1,
            seed: Hash256::ZERO,
            boundary: Hash256::ZERO,
            block: -1,
            difficulty: 0.0,
        }
    }
}

impl WorkPackage {
    /// A package with a zero header carries no work.
    pub fn is_empty(&self) -> bool {
        self.header.is_zero()
    }
}

/// A solution found by the worker for the current work package.
#[derive(Debug, Clone)]
pub struct Solution {
    /// The winning nonce
    pub nonce: u64,

    /// Header the nonce was found against
    pub header: Hash256,

    /// Whether the solution was found on an already-replaced job
    pub stale: bool,

    /// Which miner instance found it
    pub miner_index: usize,
}
