//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides the three pieces of hardware the relay touches:
//!     - the OLED (as a DisplaySurface)
//!     - the toggle button (edge interrupts into a ToggleHandler)
//!     - the reset primitive (as a Restarter)
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal` + `ssd1306`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": without the `hardware` feature the host builds on
//!       any unix box; the screen goes to the log and SIGUSR1 is the button.
//!     - "Never Block The Loop": interrupt callbacks only touch atomics.
//!
//! relationships:
//!     - used by: main.rs (builds the Hal, wires the toggle)
//!     - implements: display.rs (DisplaySurface), watchdog.rs (Restarter)
//!     - feeds: toggle.rs (ToggleHandler::on_edge)
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::config::DisplayConfig;
use crate::display::DisplaySurface;
use crate::error::TransportError;
use crate::toggle::ToggleHandler;
use crate::watchdog::{RebootReason, Restarter};

use anyhow::Result;

/// exit status used when the process restarts itself; the supervisor
/// (systemd `Restart=always`) brings it back
pub const RESTART_EXIT_CODE: i32 = 75;

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    frame: Vec<String>,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new(config: &DisplayConfig) -> Self {
        tracing::info!(
            "Using MOCK HAL (No hardware access, OLED would be bus {} addr {})",
            config.i2c_bus,
            config.i2c_address
        );
        Self { frame: Vec::new() }
    }

    /// SIGUSR1 stands in for the physical button.
    pub fn watch_toggle<C: Clock + 'static>(&mut self, mut handler: ToggleHandler, clock: C) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut presses = signal(SignalKind::user_defined1())?;
        tokio::spawn(async move {
            while presses.recv().await.is_some() {
                let accepted = handler.on_edge(clock.ticks_ms());
                tracing::debug!("[MOCK BUTTON] Press (accepted: {})", accepted);
            }
        });
        tracing::info!("[MOCK BUTTON] Send SIGUSR1 to toggle the display");
        Ok(())
    }
}

#[cfg(not(feature = "hardware"))]
impl DisplaySurface for Hal {
    fn clear(&mut self) {
        self.frame.clear();
    }

    fn draw_text(&mut self, line: &str, x: i32, y: i32) -> Result<(), TransportError> {
        tracing::trace!("[MOCK OLED] ({}, {}) {}", x, y, line);
        self.frame.push(line.to_string());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        tracing::debug!("[MOCK OLED] {:?}", self.frame);
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
type Oled = ssd1306::Ssd1306<
    ssd1306::prelude::I2CInterface<rppal::i2c::I2c>,
    ssd1306::size::DisplaySize128x64,
    ssd1306::mode::BufferedGraphicsMode<ssd1306::size::DisplaySize128x64>,
>;

#[cfg(feature = "hardware")]
pub struct Hal {
    oled: Option<Oled>,
    switch_pin: u8,
    // the interrupt is cancelled when the pin is dropped
    toggle: Option<rppal::gpio::InputPin>,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(config: &DisplayConfig) -> Self {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let oled = match Self::init_oled(config) {
            Ok(oled) => Some(oled),
            Err(e) => {
                // keep running headless; every draw reports the failure
                tracing::error!("Could not initialize OLED : {}", e);
                None
            }
        };
        Self {
            oled,
            switch_pin: config.switch_pin,
            toggle: None,
        }
    }

    fn init_oled(config: &DisplayConfig) -> Result<Oled> {
        use ssd1306::prelude::*;
        use ssd1306::{I2CDisplayInterface, Ssd1306};

        let i2c = rppal::i2c::I2c::with_bus(config.i2c_bus)?;
        let interface = I2CDisplayInterface::new_custom_address(i2c, config.address()?);
        let mut oled = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        oled.init().map_err(|e| anyhow::anyhow!("oled init failed: {:?}", e))?;
        Ok(oled)
    }

    /// Falling edge on the switch pin (pulled down) toggles the display.
    pub fn watch_toggle<C: Clock + 'static>(&mut self, mut handler: ToggleHandler, clock: C) -> Result<()> {
        use rppal::gpio::{Gpio, Trigger};

        let mut pin = Gpio::new()?.get(self.switch_pin)?.into_input_pulldown();
        pin.set_async_interrupt(Trigger::FallingEdge, None, move |_event| {
            handler.on_edge(clock.ticks_ms());
        })?;
        self.toggle = Some(pin);
        Ok(())
    }

    fn oled(&mut self) -> Result<&mut Oled, TransportError> {
        self.oled
            .as_mut()
            .ok_or_else(|| TransportError::Display("oled not initialized".into()))
    }
}

#[cfg(feature = "hardware")]
impl DisplaySurface for Hal {
    fn clear(&mut self) {
        if let Some(oled) = self.oled.as_mut() {
            oled.clear_buffer();
        }
    }

    fn draw_text(&mut self, line: &str, x: i32, y: i32) -> Result<(), TransportError> {
        use embedded_graphics::mono_font::{ascii::FONT_5X8, MonoTextStyle};
        use embedded_graphics::pixelcolor::BinaryColor;
        use embedded_graphics::prelude::*;
        use embedded_graphics::text::{Baseline, Text};

        let style = MonoTextStyle::new(&FONT_5X8, BinaryColor::On);
        Text::with_baseline(line, Point::new(x, y), style, Baseline::Top)
            .draw(self.oled()?)
            .map_err(|e| TransportError::Display(format!("{:?}", e)))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        self.oled()?
            .flush()
            .map_err(|e| TransportError::Display(format!("{:?}", e)))
    }
}

// ==============================================================================================
// RESTART
// ==============================================================================================

/// Restarts by running an optional reboot command, then exiting the process.
pub struct SystemRestart {
    command: Vec<String>,
}

impl SystemRestart {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Restarter for SystemRestart {
    fn restart(&self, reason: RebootReason) -> ! {
        tracing::error!("Restarting ({})", reason);
        if let Some((program, args)) = self.command.split_first() {
            match std::process::Command::new(program).args(args).status() {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::error!("Reboot command exited with {}", status),
                Err(e) => tracing::error!("Reboot command failed to start: {}", e),
            }
        }
        std::process::exit(RESTART_EXIT_CODE)
    }
}
