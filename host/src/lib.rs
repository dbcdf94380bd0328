//! aranet-relay: polls the Aranet cloud for a sensor reading, republishes it
//! over MQTT and keeps a status scrollback on a small OLED.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod display;
pub mod domain;
pub mod error;
pub mod hal;
pub mod mqtt;
pub mod orchestrator;
pub mod scheduler;
pub mod toggle;
pub mod watchdog;

#[cfg(test)]
mod testing;
