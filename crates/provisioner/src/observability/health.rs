//! Consumer health tracking.
//!
//! The consumer worker publishes its state machine position and failure
//! counters here; `/ready` reads them. The worker is ready while it is
//! running and its consecutive-failure count is below the configured
//! threshold.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Position of the consumer in its read/process/commit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConsumerState {
    Idle = 0,
    Reading = 1,
    Processing = 2,
    Committing = 3,
    Stopped = 4,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConsumerState::Idle,
            1 => ConsumerState::Reading,
            2 => ConsumerState::Processing,
            3 => ConsumerState::Committing,
            _ => ConsumerState::Stopped,
        }
    }
}

/// Point-in-time view of [`ConsumerHealth`], served by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumerHealthSnapshot {
    pub state: ConsumerState,
    pub ready: bool,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub processed: u64,
    pub discarded: u64,
    pub commits: u64,
}

#[derive(Debug)]
pub struct ConsumerHealth {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
    processed: AtomicU64,
    discarded: AtomicU64,
    commits: AtomicU64,
    unhealthy_after: u64,
}

impl ConsumerHealth {
    /// `unhealthy_after`: consecutive failures at which readiness is lost.
    /// Zero disables the threshold.
    #[must_use]
    pub fn new(unhealthy_after: u64) -> Self {
        Self {
            state: AtomicU8::new(ConsumerState::Idle as u8),
            consecutive_failures: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            unhealthy_after,
        }
    }

    pub fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Count a failure; returns the new consecutive count.
    pub fn record_failure(&self) -> u64 {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        let running = !matches!(self.state(), ConsumerState::Idle | ConsumerState::Stopped);
        let healthy =
            self.unhealthy_after == 0 || self.consecutive_failures() < self.unhealthy_after;
        running && healthy
    }

    #[must_use]
    pub fn snapshot(&self) -> ConsumerHealthSnapshot {
        ConsumerHealthSnapshot {
            state: self.state(),
            ready: self.is_ready(),
            consecutive_failures: self.consecutive_failures(),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            commits: self.commits(),
        }
    }
}
