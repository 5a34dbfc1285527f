//! Time injection for deterministic decay and cooldown math.
//!
//! Every component takes `now_ms` as an explicit argument; only the loop
//! edge holds a clock. Tests drive a `ManualClock` instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

pub const DAY_MS: u64 = 86_400_000;

pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> u64;

    /// UTC calendar day index of `now_ms` (days since epoch).
    fn day(&self) -> u64 {
        self.now_ms() / DAY_MS
    }
}

/// Wall-clock time via chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}

/// Steppable clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: AtomicU64::new(start_ms) }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
