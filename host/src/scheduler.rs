//! ==============================================================================
//! scheduler.rs - poll cadence and schedule bookkeeping
//! ==============================================================================
//!
//! purpose:
//!     decides when the next poll is due and owns the timestamps the rest of
//!     the loop (publishing, watchdog) depends on.
//!
//! two clocks are tracked on purpose:
//!     - last_polled / last_published / next_poll_due: board time (monotonic secs)
//!     - last_measured_device_time: the api's own measurement time
//!     they are not in sync, so neither is derived from the other.
//!
//! invariants:
//!     - next_poll_due never moves backwards once the loop has started
//!     - last_measured_device_time only increases; an older or equal reading
//!       is stale and changes nothing
//!
//! ==============================================================================

use crate::domain::SensorReading;
use crate::error::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleState {
    pub last_polled: u64,
    pub last_published: u64,
    pub last_measured_device_time: i64,
    /// `None` at loop start: the first tick polls immediately
    pub next_poll_due: Option<u64>,
}

/// Whether a reading advances on the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug)]
pub struct PollScheduler {
    interval: u64,
    late_grace: u64,
    state: ScheduleState,
}

impl PollScheduler {
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            interval: interval_seconds,
            late_grace: 0,
            state: ScheduleState::default(),
        }
    }

    /// Slack added to the interval before a publish counts as late. Polls
    /// land one tick after they are due plus request latency, so back-to-back
    /// publishes are always slightly more than one interval apart.
    pub fn with_late_grace(mut self, grace_seconds: u64) -> Self {
        self.late_grace = grace_seconds;
        self
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Reset for a fresh loop. Both success timestamps start at `now` so the
    /// watchdog does not fire straight away.
    pub fn start(&mut self, now: u64) {
        self.state = ScheduleState {
            last_polled: now,
            last_published: now,
            last_measured_device_time: 0,
            next_poll_due: None,
        };
    }

    pub fn is_due(&self, now: u64) -> bool {
        match self.state.next_poll_due {
            None => true,
            Some(due) => now > due,
        }
    }

    /// Enter the polling state: the next attempt is fixed before this one runs,
    /// so a slow or failing poll can never cause a tight retry loop.
    pub fn begin_poll(&mut self, now: u64) -> Result<(), ScheduleError> {
        let next = now.saturating_add(self.interval);
        if let Some(previous) = self.state.next_poll_due {
            if next < previous {
                return Err(ScheduleError::DueWentBackwards { previous, next });
            }
        }
        self.state.next_poll_due = Some(next);
        Ok(())
    }

    pub fn record_poll_success(&mut self, now: u64) {
        self.state.last_polled = now;
    }

    /// Classify a reading; a fresh one becomes the new high-water mark.
    pub fn accept_reading(&mut self, reading: &SensorReading) -> Freshness {
        if reading.device_time > self.state.last_measured_device_time {
            self.state.last_measured_device_time = reading.device_time;
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    pub fn record_publish(&mut self, now: u64) {
        self.state.last_published = now;
    }

    /// More than one full interval passed since the publish before this one:
    /// the upstream is lagging behind.
    pub fn is_publish_late(&self, now: u64, previous_last_published: u64) -> bool {
        now > previous_last_published
            .saturating_add(self.interval)
            .saturating_add(self.late_grace)
    }
}
