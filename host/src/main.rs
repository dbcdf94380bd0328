//! ==============================================================================
//! main.rs - aranet relay entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the relay device: config, logging, oled, toggle button, mqtt,
//!     upstream api client, then hands everything to the orchestrator and
//!     runs its loop under the crash handler.
//!
//! relationships:
//!     - uses: config.rs (relay.toml), hal.rs (oled, button, restart)
//!     - uses: api.rs, mqtt.rs (the two network collaborators)
//!     - runs: orchestrator.rs (poll -> publish -> display loop)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                     rust host (this file)                    │
//!     │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//!     │  │ run loop    │  │ mqtt event   │  │ signals             │  │
//!     │  │ (1s tick)   │  │ loop task    │  │ ctrl-c / SIGUSR2    │  │
//!     │  └──────┬──────┘  └──────────────┘  └─────────────────────┘  │
//!     │         │                                                    │
//!     │   ┌─────┴──────┐     button irq ──> debouncer ──> atomics    │
//!     │   │orchestrator│ <── (read on the next tick)                 │
//!     │   └────────────┘                                             │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use aranet_relay::api::{AranetClient, HttpTransport};
use aranet_relay::clock::{Clock, SystemClock};
use aranet_relay::config::RelayConfig;
use aranet_relay::display::{DisplayBuffer, DisplaySurface};
use aranet_relay::hal::{Hal, SystemRestart};
use aranet_relay::mqtt::MqttPublisher;
use aranet_relay::orchestrator::{LoopSettings, Orchestrator};
use aranet_relay::watchdog::WatchdogPolicy;

use anyhow::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// RUST_LOG wins over the config file's level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// push a boot status line straight to the screen
fn boot_status<S: DisplaySurface>(display: &mut DisplayBuffer, surface: &mut S, clock: &impl Clock, text: &str) {
    display.push(text, true, clock.wall_time());
    display.refresh(surface);
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // step 1: configuration (path from argv, RELAY_CONFIG, or the search paths)
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAY_CONFIG").ok())
        .map(PathBuf::from)
        .or_else(RelayConfig::find);
    let config = RelayConfig::load_or_default(path.as_deref())?;

    // step 2: logging
    init_logging(&config.logging.level);
    tracing::info!("===========================================================");
    tracing::info!("  Aranet Relay");
    tracing::info!("  cloud reading -> mqtt + oled");
    tracing::info!("===========================================================");
    match &path {
        Some(p) => tracing::info!("[CONFIG] Loaded from {}", p.display()),
        None => tracing::warn!("[CONFIG] No config file found - using defaults"),
    }
    config.print_summary();
    config.validate()?;

    // step 3: display + button
    let clock = SystemClock::new();
    let mut hal = Hal::new(&config.display);
    let mut display = DisplayBuffer::new(config.display.time_offset_hours);
    boot_status(&mut display, &mut hal, &clock, "Boot...");

    let handler = display.toggle_handler(config.polling.debounce_ms);
    if let Err(e) = hal.watch_toggle(handler, clock.clone()) {
        tracing::warn!("[BUTTON] Toggle input unavailable: {}", e);
    }

    // wifi association and ntp sync belong to the os
    if !config.wifi.ssid.is_empty() {
        tracing::info!("[WIFI] Expecting the OS to be associated with {:?}", config.wifi.ssid);
    }

    // step 4: network collaborators
    boot_status(&mut display, &mut hal, &clock, "MQTT...");
    let publisher = MqttPublisher::connect(&config.mqtt);

    boot_status(&mut display, &mut hal, &clock, "Aranet...");
    let transport = HttpTransport::new(&config.api.url, Duration::from_secs(config.api.timeout_seconds))?;
    let client = AranetClient::new(transport, config.credentials());

    // step 5: operator signals
    let restart_command = config.watchdog.reboot_command.clone();
    let mut force_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined2())?;
    tokio::spawn(async move {
        if force_signal.recv().await.is_some() {
            WatchdogPolicy::force(&SystemRestart::new(restart_command));
        }
    });

    let mut orchestrator = Orchestrator::new(
        client,
        publisher,
        hal,
        display,
        clock,
        SystemRestart::new(config.watchdog.reboot_command.clone()),
        LoopSettings {
            topic: config.mqtt.topic.clone(),
            interval_seconds: config.polling.interval_seconds,
            auto_reboot_seconds: config.watchdog.auto_reboot_seconds,
            late_grace_seconds: config.polling.late_grace_seconds,
        },
    );

    let running = orchestrator.running_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after this tick");
            running.store(false, Ordering::SeqCst);
        }
    });

    // step 6: main loop
    tracing::info!(
        "[RUNTIME] Starting relay loop ({}s interval)",
        config.polling.interval_seconds
    );
    match orchestrator.go().await {
        None => Ok(ExitCode::SUCCESS),
        Some(fault) => {
            tracing::error!("[FATAL] {}", fault);
            Ok(ExitCode::FAILURE)
        }
    }
}
