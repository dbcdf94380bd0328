//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `relay.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - WifiConfig: Network credentials (association itself is left to the OS).
//!     - ApiConfig: Aranet cloud endpoint, account and sensor id.
//!     - MqttConfig: Broker address, account and topic.
//!     - DisplayConfig: OLED bus/address, toggle pin, clock offset.
//!     - PollingConfig: Poll interval and toggle debounce window.
//!     - WatchdogConfig: Auto-reboot window and reboot command.
//!     - LoggingConfig: Default log filter.
//!
//! ==============================================================================

use crate::domain::Credentials;
use crate::toggle::DEFAULT_BOUNCE_MS;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub sensor: String,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://aranet.cloud/api/".to_string(),
            username: String::new(),
            password: String::new(),
            sensor: String::new(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: String,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            user: String::new(),
            key: String::new(),
            topic: "aranet/humidity".to_string(),
            client_id: "aranette".to_string(),
            keep_alive_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    /// i2c bus the oled hangs off (sda/scl are fixed per bus on the pi)
    pub i2c_bus: u8,
    pub i2c_address: String,
    /// bcm number of the toggle button
    pub switch_pin: u8,
    /// whole hours added to the wall clock for line stamps
    pub time_offset_hours: i32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            i2c_address: "0x3C".to_string(),
            switch_pin: 17,
            time_offset_hours: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub debounce_ms: u64,
    /// a fresh publish more than interval + grace after the previous one is
    /// flagged "*". 0 keeps the bare interval.
    pub late_grace_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 600,
            debounce_ms: DEFAULT_BOUNCE_MS,
            late_grace_seconds: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchdogConfig {
    /// 0 disables the automatic restart
    pub auto_reboot_seconds: u64,
    /// run before the process exits on restart, e.g. ["sudo", "reboot"]
    pub reboot_command: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            auto_reboot_seconds: 1800,
            reboot_command: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl DisplayConfig {
    /// Parse `i2c_address` ("0x3C" or "60").
    pub fn address(&self) -> anyhow::Result<u8> {
        let raw = self.i2c_address.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => raw.parse::<u8>(),
        };
        parsed.map_err(|e| anyhow::anyhow!("Invalid display.i2c_address {:?}: {}", raw, e))
    }
}

impl RelayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: RelayConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// First existing file among the default search paths
    pub fn find() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config").join("relay.toml"),
            PathBuf::from("..").join("config").join("relay.toml"),
        ];
        paths.into_iter().find(|p| p.exists())
    }

    /// Load `path`, or fall back to defaults when there is none
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.interval_seconds == 0 {
            anyhow::bail!("polling.interval_seconds must be greater than 0");
        }
        if self.api.url.is_empty() {
            anyhow::bail!("api.url is required");
        }
        if self.api.username.is_empty() {
            anyhow::bail!("api.username is required");
        }
        if self.api.sensor.is_empty() {
            anyhow::bail!("api.sensor is required");
        }
        if self.mqtt.topic.is_empty() {
            anyhow::bail!("mqtt.topic is required");
        }
        self.display.address()?;
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.api.username.clone(),
            password: self.api.password.clone(),
            sensor_id: self.api.sensor.clone(),
        }
    }

    /// Log configuration summary (secrets elided)
    pub fn print_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          RELAY CONFIGURATION            │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ WiFi SSID: {}", self.wifi.ssid);
        tracing::info!("│ API: {} (user {})", self.api.url, self.api.username);
        tracing::info!("│ Sensor: {}", self.api.sensor);
        tracing::info!("│ MQTT: {}:{} -> {}", self.mqtt.host, self.mqtt.port, self.mqtt.topic);
        tracing::info!("│ Poll Interval: {}s", self.polling.interval_seconds);
        tracing::info!("│ Auto Reboot: {}s", self.watchdog.auto_reboot_seconds);
        tracing::info!("│ Debounce: {}ms", self.polling.debounce_ms);
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
