//! ==============================================================================
//! orchestrator.rs - the device run loop
//! ==============================================================================
//!
//! purpose:
//!     owns every piece of device state and drives one cycle per second:
//!
//! ```text
//!     ┌──────┐  due?  ┌─────────┐  fresh  ┌────────────┐
//!     │ IDLE │ ─────> │ POLLING │ ──────> │ PUBLISHING │ ──┐
//!     └──────┘        └─────────┘         └────────────┘   │
//!         ^             │     │   not newer  ┌───────┐     │
//!         │             │     └────────────> │ STALE │ ────┤
//!         │             │  failure           └───────┘     │
//!         │             └──────────────────> ┌───────┐     │
//!         │                                  │ ERROR │ ────┤
//!         │                                  └───────┘     │
//!         └──────────── watchdog check, sleep 1s <─────────┘
//! ```
//!
//! error policy:
//!     per-cycle failures (api, broker, display) are matched at the call site,
//!     logged and turned into a status line ("Error", "Old"). only a genuinely
//!     unexpected fault escapes run(); go() renders it as a crash banner and
//!     returns. recovery from there is the watchdog/supervisor's job.
//!
//! relationships:
//!     - uses: api.rs, mqtt.rs, display.rs, scheduler.rs, watchdog.rs, toggle.rs
//!     - used by: main.rs
//!
//! ==============================================================================

use crate::api::{AranetClient, ApiTransport};
use crate::clock::Clock;
use crate::display::{DisplayBuffer, DisplaySurface};
use crate::error::{ScheduleError, UnrecoverableFault};
use crate::mqtt::{format_payload, Publisher, ABSENT_PAYLOAD};
use crate::scheduler::{Freshness, PollScheduler, ScheduleState};
use crate::toggle::ToggleHandler;
use crate::watchdog::{Restarter, WatchdogPolicy};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// loop granularity
pub const TICK: Duration = Duration::from_secs(1);

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// no poll was due
    Idle,
    /// fresh reading; `published` is false when the broker refused it
    Published { value: Option<f64>, published: bool, late: bool },
    /// the api had nothing newer than the last accepted reading
    Stale,
    /// the poll failed (transport, auth or parse)
    Error,
}

/// Non-collaborator settings for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub topic: String,
    pub interval_seconds: u64,
    pub auto_reboot_seconds: u64,
    /// slack before a publish is flagged as late (see `PollScheduler::with_late_grace`)
    pub late_grace_seconds: u64,
}

/// Status line for a fresh value: `55%`, `N/A`, with ` *` when upstream lags.
pub fn format_value(value: Option<f64>, warning: bool) -> String {
    let nugget = match value {
        Some(v) => format!("{}%", v.round()),
        None => "N/A".to_string(),
    };
    if warning {
        format!("{} *", nugget)
    } else {
        nugget
    }
}

pub struct Orchestrator<T, P, S, C, R> {
    client: AranetClient<T>,
    publisher: P,
    surface: S,
    clock: C,
    restarter: R,
    topic: String,
    display: DisplayBuffer,
    scheduler: PollScheduler,
    watchdog: WatchdogPolicy,
    running: Arc<AtomicBool>,
}

impl<T, P, S, C, R> Orchestrator<T, P, S, C, R>
where
    T: ApiTransport,
    P: Publisher,
    S: DisplaySurface,
    C: Clock,
    R: Restarter,
{
    pub fn new(
        client: AranetClient<T>,
        publisher: P,
        surface: S,
        display: DisplayBuffer,
        clock: C,
        restarter: R,
        settings: LoopSettings,
    ) -> Self {
        Self {
            client,
            publisher,
            surface,
            clock,
            restarter,
            topic: settings.topic,
            display,
            scheduler: PollScheduler::new(settings.interval_seconds)
                .with_late_grace(settings.late_grace_seconds),
            watchdog: WatchdogPolicy::new(settings.auto_reboot_seconds),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Handler for the toggle interrupt, sharing this loop's visibility flag.
    pub fn toggle_handler(&self, debounce_ms: u64) -> ToggleHandler {
        self.display.toggle_handler(debounce_ms)
    }

    /// Clearing this flag stops the loop after the current tick.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn display(&self) -> &DisplayBuffer {
        &self.display
    }

    pub fn schedule(&self) -> &ScheduleState {
        self.scheduler.state()
    }

    /// Push a status line and redraw.
    pub fn write(&mut self, text: &str, timestamped: bool) {
        self.display.push(text, timestamped, self.clock.wall_time());
        self.display.refresh(&mut self.surface);
    }

    /// Reset the schedule for a fresh loop.
    pub fn start(&mut self) {
        self.scheduler.start(self.clock.now_secs());
        self.write("Start...", true);
    }

    /// One full iteration: redraw if toggled, poll if due, watchdog check.
    pub async fn tick(&mut self) -> Result<CycleOutcome, ScheduleError> {
        if self.display.take_redraw() {
            self.display.refresh(&mut self.surface);
        }

        let now = self.clock.now_secs();
        let outcome = if self.scheduler.is_due(now) {
            self.scheduler.begin_poll(now)?;
            self.attempt().await
        } else {
            CycleOutcome::Idle
        };

        let state = *self.scheduler.state();
        self.watchdog.check(
            &self.restarter,
            false,
            self.clock.now_secs(),
            state.last_polled,
            state.last_published,
        );
        Ok(outcome)
    }

    /// Poll, then publish or flag stale. Never fails: errors become statuses.
    pub async fn attempt(&mut self) -> CycleOutcome {
        let reading = match self.client.poll().await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!("Could not fetch data from Aranet : {}", e);
                self.write("Error", true);
                return CycleOutcome::Error;
            }
        };

        let now = self.clock.now_secs();
        self.scheduler.record_poll_success(now);

        match self.scheduler.accept_reading(&reading) {
            Freshness::Fresh => {
                let previous_published = self.scheduler.state().last_published;
                let published = self.publish(reading.value).await;
                let late = self.scheduler.is_publish_late(now, previous_published);
                tracing::info!(
                    device_time = reading.device_time,
                    value = ?reading.value,
                    published,
                    late,
                    "Fresh reading"
                );
                self.write(&format_value(reading.value, late), true);
                CycleOutcome::Published { value: reading.value, published, late }
            }
            Freshness::Stale => {
                tracing::debug!(device_time = reading.device_time, "Stale reading");
                self.write("Old", true);
                CycleOutcome::Stale
            }
        }
    }

    /// Returns whether the broker took the value.
    async fn publish(&mut self, value: Option<f64>) -> bool {
        if value.is_none() {
            tracing::warn!("Reading has no value, publishing {}", ABSENT_PAYLOAD);
        }
        match self.publisher.publish(&self.topic, format_payload(value)).await {
            Ok(()) => {
                self.scheduler.record_publish(self.clock.now_secs());
                true
            }
            Err(e) => {
                tracing::warn!("Could not publish to MQTT : {}", e);
                false
            }
        }
    }

    /// The run loop. Returns when the running flag is cleared.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.start();
        while self.running.load(Ordering::SeqCst) {
            self.tick().await?;
            tokio::time::sleep(TICK).await;
        }
        tracing::info!("Run loop stopped");
        Ok(())
    }

    /// Crash handler around `run`: errors and panics end up on the screen.
    pub async fn go(&mut self) -> Option<UnrecoverableFault> {
        let fault = match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(Ok(())) => return None,
            Ok(Err(e)) => UnrecoverableFault::from_error(&e),
            Err(payload) => UnrecoverableFault::from_panic(payload),
        };
        tracing::error!("Run loop crashed: {}", fault);
        self.write("[CRASH]", true);
        self.write(&format!(": {}", fault.category), false);
        self.write(&format!(": {}", fault.message), false);
        Some(fault)
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use crate::testing::*;
    use serde_json::{json, Value};

    type TestLoop<T> = Orchestrator<T, RecordingPublisher, RecordingSurface, ManualClock, PanickingRestarter>;

    fn settings(auto_reboot_seconds: u64) -> LoopSettings {
        LoopSettings {
            topic: "home/humidity".into(),
            interval_seconds: 600,
            auto_reboot_seconds,
            late_grace_seconds: 0,
        }
    }

    fn challenge(salt: &str) -> Result<Value, TransportError> {
        Ok(json!({"auth": {"permasalt": "perm", "salt": salt}}))
    }

    fn data(time: i64, h: Value) -> Result<Value, TransportError> {
        Ok(json!({"currData": {"sensor-1": {"time": time, "h": h}}}))
    }

    fn build<T: ApiTransport>(
        api: T,
        publisher: RecordingPublisher,
        clock: &ManualClock,
        auto_reboot_seconds: u64,
    ) -> TestLoop<T> {
        build_with(api, publisher, clock, settings(auto_reboot_seconds))
    }

    fn build_with<T: ApiTransport>(
        api: T,
        publisher: RecordingPublisher,
        clock: &ManualClock,
        settings: LoopSettings,
    ) -> TestLoop<T> {
        Orchestrator::new(
            AranetClient::new(api, credentials()),
            publisher,
            RecordingSurface::default(),
            DisplayBuffer::new(0),
            clock.clone(),
            PanickingRestarter,
            settings,
        )
    }

    fn last_line<T: ApiTransport>(o: &TestLoop<T>) -> String {
        o.display().lines().last().unwrap().text.clone()
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Some(54.6), false), "55%");
        assert_eq!(format_value(Some(54.4), true), "54% *");
        assert_eq!(format_value(None, false), "N/A");
        assert_eq!(format_value(None, true), "N/A *");
    }

    #[tokio::test]
    async fn test_publish_then_stale() {
        let clock = ManualClock::new();
        let publisher = RecordingPublisher::default();
        let published = publisher.published.clone();
        let api = ScriptedApi::new(vec![
            challenge("a"),
            data(100, json!(55.0)),
            challenge("b"),
            data(100, json!(56.0)),
        ]);
        let mut o = build(api, publisher, &clock, 1800);
        o.start();

        let outcome = o.tick().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Published { value: Some(55.0), published: true, late: false }
        );
        assert_eq!(o.schedule().next_poll_due, Some(600));
        assert_eq!(o.schedule().last_measured_device_time, 100);
        assert_eq!(last_line(&o), "00:00|55%");
        assert_eq!(
            *published.lock().unwrap(),
            vec![("home/humidity".to_string(), "55.0".to_string())]
        );

        clock.set_secs(550);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Idle);

        // same device_time again
        assert_eq!(o.attempt().await, CycleOutcome::Stale);
        assert_eq!(last_line(&o), "00:00|Old");
        assert_eq!(published.lock().unwrap().len(), 1);
        assert_eq!(o.schedule().last_polled, 550);
        assert_eq!(o.schedule().last_published, 0);
    }

    #[tokio::test]
    async fn test_poll_failure_shows_error_and_keeps_last_polled() {
        let clock = ManualClock::new();
        clock.set_secs(10);
        let api = ScriptedApi::new(vec![Err(TransportError::Request("timeout".into()))]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 1800);
        o.start();

        clock.set_secs(12);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Error);
        assert_eq!(last_line(&o), "00:00|Error");
        assert_eq!(o.schedule().last_polled, 10);
        // next attempt still governed by the interval, no retry
        assert_eq!(o.schedule().next_poll_due, Some(612));
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_reused_salt_is_a_poll_failure() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![
            challenge("same"),
            data(100, json!(40)),
            challenge("same"),
        ]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 0);
        o.start();
        assert!(matches!(o.tick().await.unwrap(), CycleOutcome::Published { .. }));
        clock.set_secs(601);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Error);
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_last_published() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![challenge("a"), data(100, json!(61.2))]);
        let mut o = build(api, RecordingPublisher::failing(), &clock, 1800);
        o.start();

        clock.set_secs(5);
        let outcome = o.tick().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Published { value: Some(61.2), published: false, late: false }
        );
        assert_eq!(o.schedule().last_polled, 5);
        assert_eq!(o.schedule().last_published, 0);
        assert_eq!(o.schedule().last_measured_device_time, 100);
        assert_eq!(last_line(&o), "00:00|61%");
    }

    #[tokio::test]
    async fn test_absent_value_publishes_placeholder() {
        let clock = ManualClock::new();
        let publisher = RecordingPublisher::default();
        let published = publisher.published.clone();
        let api = ScriptedApi::new(vec![challenge("a"), data(100, Value::Null)]);
        let mut o = build(api, publisher, &clock, 1800);
        o.start();

        clock.set_secs(3);
        let outcome = o.tick().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Published { value: None, published: true, late: false });
        assert_eq!(
            *published.lock().unwrap(),
            vec![("home/humidity".to_string(), "null".to_string())]
        );
        assert_eq!(o.schedule().last_published, 3);
        assert_eq!(last_line(&o), "00:00|N/A");
    }

    #[tokio::test]
    async fn test_readings_without_value_keep_watchdog_quiet() {
        let clock = ManualClock::new();
        let publisher = RecordingPublisher::default();
        let published = publisher.published.clone();
        let api = ScriptedApi::new(vec![
            challenge("a"),
            data(100, Value::Null),
            challenge("b"),
            data(200, Value::Null),
            challenge("c"),
            data(300, Value::Null),
            challenge("d"),
            data(400, Value::Null),
        ]);
        let mut o = build(api, publisher, &clock, 1800);
        o.start();

        for t in [0, 601, 1_202, 1_803] {
            clock.set_secs(t);
            assert!(matches!(
                o.tick().await.unwrap(),
                CycleOutcome::Published { value: None, published: true, .. }
            ));
            assert_eq!(o.schedule().last_published, t);
        }
        assert_eq!(published.lock().unwrap().len(), 4);

        // past the reboot window measured from boot, but not from the last publish
        clock.set_secs(2_300);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_late_publish_is_flagged() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![
            challenge("a"),
            data(100, json!(50)),
            challenge("b"),
            data(100, json!(50)),
            challenge("c"),
            data(101, json!(50)),
        ]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 0);
        o.start();
        assert!(matches!(o.tick().await.unwrap(), CycleOutcome::Published { late: false, .. }));

        // upstream did not advance for a whole cycle
        clock.set_secs(601);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Stale);

        clock.set_secs(1_202);
        let outcome = o.tick().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Published { value: Some(50.0), published: true, late: true });
        assert_eq!(last_line(&o), "00:00|50% *");
    }

    #[tokio::test]
    async fn test_late_flag_uses_bare_interval_by_default() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![
            challenge("a"),
            data(100, json!(50)),
            challenge("b"),
            data(101, json!(50)),
        ]);
        let mut o = build_with(api, RecordingPublisher::default(), &clock, settings(0));
        o.start();
        o.tick().await.unwrap();

        clock.set_secs(620);
        assert_eq!(
            o.tick().await.unwrap(),
            CycleOutcome::Published { value: Some(50.0), published: true, late: true }
        );
    }

    #[tokio::test]
    async fn test_late_grace_tolerates_regular_cadence() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![
            challenge("a"),
            data(100, json!(50)),
            challenge("b"),
            data(101, json!(50)),
        ]);
        let settings = LoopSettings { late_grace_seconds: 30, ..settings(0) };
        let mut o = build_with(api, RecordingPublisher::default(), &clock, settings);
        o.start();
        o.tick().await.unwrap();

        clock.set_secs(620);
        assert!(matches!(
            o.tick().await.unwrap(),
            CycleOutcome::Published { late: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_toggle_redraws_on_next_tick() {
        let clock = ManualClock::new();
        clock.set_secs(1);
        let api = ScriptedApi::new(vec![challenge("a"), data(1, json!(50))]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 0);
        o.start();
        o.tick().await.unwrap();
        assert_eq!(o.surface.drawn.len(), 2);

        let mut handler = o.toggle_handler(150);
        assert!(handler.on_edge(1_000));
        assert!(!handler.on_edge(1_050));
        assert!(!o.display().is_visible());

        let commits = o.surface.commits;
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(o.surface.commits, commits + 1);
        assert!(o.surface.drawn.is_empty());
        // buffer untouched while hidden
        assert_eq!(o.display().len(), 2);

        // no pending event: no redraw
        o.tick().await.unwrap();
        assert_eq!(o.surface.commits, commits + 1);
    }

    #[tokio::test]
    #[should_panic(expected = "restart: auto reboot timer was exceeded")]
    async fn test_watchdog_restarts_after_prolonged_failure() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 1800);
        o.start();

        for t in [0, 601, 1_202] {
            clock.set_secs(t);
            assert_eq!(o.tick().await.unwrap(), CycleOutcome::Error);
        }
        clock.set_secs(1_801);
        let _ = o.tick().await;
    }

    #[tokio::test]
    async fn test_watchdog_disabled_never_restarts() {
        let clock = ManualClock::new();
        let api = ScriptedApi::new(vec![]);
        let mut o = build(api, RecordingPublisher::default(), &clock, 0);
        o.start();
        clock.set_secs(1_000_000);
        assert_eq!(o.tick().await.unwrap(), CycleOutcome::Error);
    }

    #[tokio::test]
    async fn test_go_renders_crash_banner() {
        let clock = ManualClock::new();
        let mut o = build(PanickingApi, RecordingPublisher::default(), &clock, 0);

        let fault = o.go().await.unwrap();
        assert_eq!(fault.category, "Panic");
        assert_eq!(fault.message, "transport exploded");

        let lines: Vec<String> = o.display().lines().map(|l| l.text.clone()).collect();
        assert_eq!(
            lines,
            vec!["00:00|Start...", "00:00|[CRASH]", ": Panic", ": transport exploded"]
        );
    }

    #[tokio::test]
    async fn test_go_returns_cleanly_when_stopped() {
        let clock = ManualClock::new();
        let mut o = build(ScriptedApi::new(vec![]), RecordingPublisher::default(), &clock, 0);
        o.running_flag().store(false, Ordering::SeqCst);
        assert!(o.go().await.is_none());
        assert_eq!(last_line(&o), "00:00|Start...");
    }
}
