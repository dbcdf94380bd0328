//! ==============================================================================
//! watchdog.rs - unattended recovery
//! ==============================================================================
//!
//! purpose:
//!     if either polling or publishing has not succeeded for longer than the
//!     auto-reboot window, something local retries cannot fix is stuck (dead
//!     wifi, unreachable broker). the device restarts.
//!
//! relationships:
//!     - used by: orchestrator.rs (check after every cycle), main.rs (SIGUSR2)
//!     - implemented by: hal.rs (SystemRestart)
//!
//! ==============================================================================

use std::fmt;

/// Why a restart was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    /// operator asked for it (SIGUSR2)
    Forced,
    /// poll or publish has been failing for longer than the window
    AutoRebootExceeded,
}

impl fmt::Display for RebootReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootReason::Forced => write!(f, "forced"),
            RebootReason::AutoRebootExceeded => write!(f, "auto reboot timer was exceeded"),
        }
    }
}

/// The reset primitive. Implementations never return.
pub trait Restarter {
    fn restart(&self, reason: RebootReason) -> !;
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogPolicy {
    /// 0 disables the automatic restart
    pub auto_reboot_seconds: u64,
}

impl WatchdogPolicy {
    pub fn new(auto_reboot_seconds: u64) -> Self {
        Self { auto_reboot_seconds }
    }

    pub fn should_reboot(&self, now: u64, last_polled: u64, last_published: u64) -> bool {
        if self.auto_reboot_seconds == 0 {
            return false;
        }
        now > last_polled.min(last_published).saturating_add(self.auto_reboot_seconds)
    }

    /// Restart unconditionally, bypassing the policy.
    pub fn force<R: Restarter>(restarter: &R) -> ! {
        tracing::warn!("Rebooting board [FORCED].");
        restarter.restart(RebootReason::Forced)
    }

    /// Restart if forced or if the policy says so; otherwise return.
    pub fn check<R: Restarter>(&self, restarter: &R, force: bool, now: u64, last_polled: u64, last_published: u64) {
        if force {
            Self::force(restarter);
        }
        if self.should_reboot(now, last_polled, last_published) {
            tracing::warn!(
                now,
                last_polled,
                last_published,
                "Rebooting board. Auto reboot timer was exceeded."
            );
            restarter.restart(RebootReason::AutoRebootExceeded);
        }
    }
}
