//! ==============================================================================
//! clock.rs - time sources used by the loop
//! ==============================================================================
//!
//! purpose:
//!     three distinct clocks behind one trait:
//!     - now_secs():  monotonic seconds, drives polling and the watchdog
//!     - ticks_ms():  monotonic milliseconds, drives the toggle debouncer
//!     - wall_time(): time of day, only used to stamp display lines
//!                    (assumed ntp-synced by the os before we start)
//!
//! relationships:
//!     - used by: orchestrator.rs (schedule, stamps), hal.rs (button edges)
//!     - ManualClock: drives the orchestrator tests
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
    fn ticks_ms(&self) -> u64;
    fn wall_time(&self) -> DateTime<Utc>;
}

/// Real clock backed by `Instant` and the system time of day.
#[derive(Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn ticks_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle and advance it while the orchestrator owns another.
#[derive(Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
    wall_offset_secs: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// set the wall clock, as seconds since the unix epoch
    pub fn set_wall(&self, epoch_secs: i64) {
        self.wall_offset_secs.store(epoch_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.millis.load(Ordering::SeqCst) / 1000
    }

    fn ticks_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let secs = self.wall_offset_secs.load(Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}
