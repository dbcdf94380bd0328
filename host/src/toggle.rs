//! ==============================================================================
//! toggle.rs - debounced display on/off button
//! ==============================================================================
//!
//! purpose:
//!     a mechanical push-button bounces and fires dozens of edge interrupts per
//!     physical press. the debouncer accepts one trigger per bounce window and
//!     flips the display visibility.
//!
//! concurrency:
//!     the handler runs on the interrupt thread (rppal) or the signal task
//!     (mock hal). it must not block or touch the display hardware, so it only:
//!       1. flips the shared visibility flag (single atomic word)
//!       2. raises a "redraw pending" flag (event queue of depth 1, latest wins)
//!     the main loop consumes the pending flag on its next tick and redraws.
//!
//! relationships:
//!     - used by: hal.rs (interrupt callback, SIGUSR1 listener in mock mode)
//!     - shares: visibility flag and pending redraw with display.rs
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// default bounce window for the toggle button
pub const DEFAULT_BOUNCE_MS: u64 = 150;

#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    last_toggle_ms: u64,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, last_toggle_ms: 0 }
    }

    /// true if this trigger should be acted upon
    pub fn on_trigger(&mut self, now_ms: u64) -> bool {
        if now_ms.abs_diff(self.last_toggle_ms) > self.window_ms {
            self.last_toggle_ms = now_ms;
            true
        } else {
            false
        }
    }

    pub fn last_toggle_ms(&self) -> u64 {
        self.last_toggle_ms
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNCE_MS)
    }
}

/// Depth-1 event queue between the toggle handler and the main loop.
#[derive(Clone, Default)]
pub struct PendingRedraw(Arc<AtomicBool>);

impl PendingRedraw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// consume the event, if any
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Everything the interrupt handler owns.
pub struct ToggleHandler {
    debouncer: Debouncer,
    visible: Arc<AtomicBool>,
    pending: PendingRedraw,
}

impl ToggleHandler {
    pub fn new(debouncer: Debouncer, visible: Arc<AtomicBool>, pending: PendingRedraw) -> Self {
        Self { debouncer, visible, pending }
    }

    /// Called for every edge. Returns whether the press was accepted.
    pub fn on_edge(&mut self, now_ms: u64) -> bool {
        if !self.debouncer.on_trigger(now_ms) {
            return false;
        }
        self.visible.fetch_xor(true, Ordering::SeqCst);
        self.pending.raise();
        true
    }
}
