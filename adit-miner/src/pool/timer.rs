//! The manager's named deadlines.
//!
//! Three independent timers drive failback, hashrate reporting, and delayed
//! reconnects. They are multiplexed into the manager's event loop: arming
//! replaces the deadline, cancelling clears it, and a cleared timer simply
//! never fires.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// The three deadlines the manager schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Return to the preferred endpoint after running on a fallback
    Failover,
    /// Periodic hashrate report to the connected pool
    HashrateReport,
    /// Delay before the next connection attempt
    RetryDelay,
}

const KINDS: [TimerKind; 3] = [
    TimerKind::Failover,
    TimerKind::HashrateReport,
    TimerKind::RetryDelay,
];

/// Deadline set multiplexed into a single `select!` branch.
#[derive(Debug, Default)]
pub struct TimerSet {
    deadlines: [Option<Instant>; 3],
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines[kind as usize] = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind as usize] = None;
    }

    pub fn cancel_all(&mut self) {
        self.deadlines = [None; 3];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind as usize].is_some()
    }

    pub fn any_armed(&self) -> bool {
        self.deadlines.iter().any(Option::is_some)
    }

    /// Await the earliest armed deadline and disarm it on expiry.
    ///
    /// Pends forever while nothing is armed. Cancel-safe: the deadline is
    /// only cleared when this future completes, so dropping it mid-wait
    /// leaves the timer armed.
    pub async fn expired(&mut self) -> TimerKind {
        let earliest = self
            .deadlines
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|at| (i, at)))
            .min_by_key(|&(_, at)| at);

        match earliest {
            Some((index, at)) => {
                sleep_until(at).await;
                self.deadlines[index] = None;
                KINDS[index]
            }
            None => std::future::pending().await,
        }
    }
}
