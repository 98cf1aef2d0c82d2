//! Mining worker abstraction.
//!
//! The pool manager drives the worker's lifecycle in lock-step with the pool
//! session: started or resumed on connect, paused on connection loss, stopped
//! on shutdown. The worker itself (hash computation, device orchestration,
//! solution generation) lives behind the [`Worker`] trait; it reports back
//! through [`WorkerEvent`]s on a channel the manager receives.

use std::fmt;

use crate::pool::work::{Solution, WorkPackage};
use crate::tracing::prelude::*;

/// Hashrate measurement in hashes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashRate(pub u64);

impl HashRate {
    /// Create from gigahashes per second
    pub fn from_gigahashes(gh: f64) -> Self {
        Self((gh * 1_000_000_000.0) as u64)
    }

    /// Get value as gigahashes per second
    pub fn as_gigahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000_000 {
            write!(f, "{:.2} TH/s", self.0 as f64 / 1_000_000_000_000.0)
        } else if self.0 >= 1_000_000_000 {
            write!(f, "{:.2} GH/s", self.as_gigahashes())
        } else if self.0 >= 1_000_000 {
            write!(f, "{:.2} MH/s", self.0 as f64 / 1_000_000.0)
        } else {
            write!(f, "{} H/s", self.0)
        }
    }
}

/// Events emitted by the worker toward the pool manager.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The worker wants a full stop/start cycle (e.g. after reconfiguration)
    MinerRestart,

    /// A solution was found for the current work.
    ///
    /// The manager forwards it to the connected client, or drops it when no
    /// connection is live; either way the worker must not retain it.
    SolutionFound(Solution),
}

/// Contract the pool manager consumes from the mining worker.
pub trait Worker: Send {
    fn is_mining(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn start(&mut self);
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_work(&mut self, work: &WorkPackage);
    fn hash_rate(&self) -> HashRate;
}

/// A worker that tracks lifecycle state and reports a configured hash rate
/// without doing any hashing. Lets the daemon run end-to-end against the
/// simulated pool.
#[derive(Debug)]
pub struct DummyWorker {
    mining: bool,
    paused: bool,
    rate: HashRate,
    current_job: Option<String>,
}

impl DummyWorker {
    pub fn new(rate: HashRate) -> Self {
        Self {
            mining: false,
            paused: false,
            rate,
            current_job: None,
        }
    }
}

impl Worker for DummyWorker {
    fn is_mining(&self) -> bool {
        self.mining
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn start(&mut self) {
        debug!("Worker started");
        self.mining = true;
        self.paused = false;
    }

    fn stop(&mut self) {
        debug!("Worker stopped");
        self.mining = false;
        self.paused = false;
        self.current_job = None;
    }

    fn pause(&mut self) {
        if self.mining {
            debug!("Worker paused");
            self.paused = true;
        }
    }

    fn resume(&mut self) {
        if self.mining {
            debug!("Worker resumed");
            self.paused = false;
        }
    }

    fn set_work(&mut self, work: &WorkPackage) {
        trace!(job = %work.job, epoch = work.epoch, "Worker received work");
        self.current_job = Some(work.job.clone());
    }

    fn hash_rate(&self) -> HashRate {
        if self.mining && !self.paused {
            self.rate
        } else {
            HashRate::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::work::Hash256;

    #[test]
    fn test_hashrate_display() {
        assert_eq!(HashRate(950).to_string(), "950 H/s");
        assert_eq!(HashRate::from_gigahashes(1.5).to_string(), "1.50 GH/s");
        assert_eq!(HashRate(2_500_000).to_string(), "2.50 MH/s");
    }

    #[test]
    fn test_dummy_worker_lifecycle() {
        let mut worker = DummyWorker::new(HashRate::from_gigahashes(1.0));
        assert!(!worker.is_mining());

        worker.start();
        assert!(worker.is_mining());
        assert!(!worker.is_paused());
        assert_eq!(worker.hash_rate(), HashRate::from_gigahashes(1.0));

        worker.pause();
        assert!(worker.is_paused());
        assert_eq!(worker.hash_rate(), HashRate::default());

        worker.resume();
        assert!(!worker.is_paused());

        worker.stop();
        assert!(!worker.is_mining());
        assert_eq!(worker.hash_rate(), HashRate::default());
    }

    #[test]
    fn test_pause_before_start_is_noop() {
        let mut worker = DummyWorker::new(HashRate::default());
        worker.pause();
        assert!(!worker.is_paused());
    }

    #[test]
    fn test_set_work_tracks_job() {
        let mut worker = DummyWorker::new(HashRate::default());
        worker.start();
        worker.set_work(&WorkPackage {
            header: Hash256::keccak(b"w"),
            job: "job-1".into(),
            ..WorkPackage::default()
        });
        assert_eq!(worker.current_job.as_deref(), Some("job-1"));

        worker.stop();
        assert!(worker.current_job.is_none());
    }
}
