//! ==============================================================================
//! display.rs - status scrollback for the oled
//! ==============================================================================
//!
//! purpose:
//!     keeps the last few status lines ("Boot...", "14:05|55%", "Old", ...)
//!     independent of the physical display technology, and pushes them to a
//!     DisplaySurface once per render.
//!
//! layout:
//!     8 lines of 8px on a 128x64 panel. line i is drawn at (0, i * 8).
//!
//! relationships:
//!     - used by: orchestrator.rs (status lines), main.rs (boot lines)
//!     - shares: visibility flag and redraw event with toggle.rs
//!     - implemented by: hal.rs (mock surface, ssd1306 surface)
//!
//! ==============================================================================

use crate::error::TransportError;
use crate::toggle::{Debouncer, PendingRedraw, ToggleHandler};
use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// lines that fit on the panel
pub const MAX_LINES: usize = 8;

/// pixel height of one text row
pub const LINE_HEIGHT: i32 = 8;

/// The physical screen. Every call may fail with a transport error.
pub trait DisplaySurface {
    fn clear(&mut self);
    fn draw_text(&mut self, line: &str, x: i32, y: i32) -> Result<(), TransportError>;
    /// push the frame buffer to the hardware
    fn commit(&mut self) -> Result<(), TransportError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayLine {
    pub text: String,
    pub timestamped: bool,
}

/// `HH:MM` of `now` shifted by whole hours, wrapping at midnight.
pub fn time_of_day(now: DateTime<Utc>, offset_hours: i32) -> String {
    let shifted = now + Duration::hours(offset_hours as i64);
    format!("{:02}:{:02}", shifted.hour(), shifted.minute())
}

/// Bounded FIFO of status lines plus an on/off visibility flag.
///
/// The flag and the redraw event live behind `Arc`s because the toggle
/// interrupt touches them from another thread; the lines are owned by the loop.
pub struct DisplayBuffer {
    lines: VecDeque<DisplayLine>,
    visible: Arc<AtomicBool>,
    redraw: PendingRedraw,
    offset_hours: i32,
}

impl DisplayBuffer {
    pub fn new(offset_hours: i32) -> Self {
        Self {
            lines: VecDeque::with_capacity(MAX_LINES + 1),
            visible: Arc::new(AtomicBool::new(true)),
            redraw: PendingRedraw::new(),
            offset_hours,
        }
    }

    /// Interrupt-side handler bound to this buffer's visibility flag.
    pub fn toggle_handler(&self, debounce_ms: u64) -> ToggleHandler {
        ToggleHandler::new(Debouncer::new(debounce_ms), self.visible.clone(), self.redraw.clone())
    }

    /// Consume a redraw requested by the toggle handler.
    pub fn take_redraw(&self) -> bool {
        self.redraw.take()
    }

    /// Append a line. Timestamped lines get an `HH:MM|` prefix taken from `now`.
    pub fn push(&mut self, text: &str, timestamped: bool, now: DateTime<Utc>) {
        let text = if timestamped {
            format!("{}|{}", time_of_day(now, self.offset_hours), text)
        } else {
            text.to_string()
        };
        self.lines.push_back(DisplayLine { text, timestamped });
        while self.lines.len() > MAX_LINES {
            self.lines.pop_front();
        }
    }

    pub fn toggle_visibility(&self) {
        self.visible.fetch_xor(true, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn lines(&self) -> impl Iterator<Item = &DisplayLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// What should be on screen right now: the buffer, or nothing when hidden.
    pub fn render(&self) -> Vec<&str> {
        if !self.is_visible() {
            return Vec::new();
        }
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }

    /// Redraw the surface. Transport errors are logged and dropped.
    pub fn refresh<S: DisplaySurface>(&self, surface: &mut S) {
        surface.clear();
        if let Err(e) = self.draw(surface) {
            tracing::warn!("Display refresh failed: {} (last line: {:?})", e, self.lines.back().map(|l| &l.text));
        }
    }

    fn draw<S: DisplaySurface>(&self, surface: &mut S) -> Result<(), TransportError> {
        for (i, line) in self.render().into_iter().enumerate() {
            surface.draw_text(line, 0, i as i32 * LINE_HEIGHT)?;
        }
        surface.commit()
    }
}
