//! Configuration management
//!
//! ```toml
//! [app]
//! log_level = "info"
//!
//! [device]
//! vendor_id = "0x045e"
//! product_id = "0x0750"
//! detach_interfaces = [0, 1]
//! interface = 0
//! interrupt_endpoint = "0x81"
//! infinite_idle = false
//!
//! [pins]
//! outputs = 3
//! inputs = 4
//! output_invert = false
//! input_invert = false
//!
//! [input]
//! mode = "polled"
//!
//! [timing]
//! output_settle_us = 500
//! control_timeout_ms = 0
//! poll_interval_ms = 1000
//!
//! [demo]
//! step_ms = 500
//! watch_inputs = true
//! ```

use crate::gpio::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, GpioOptions};
use crate::pins::{PinTiming, default_input_settle};
use anyhow::{Context, Result, anyhow};
use protocol::report::is_in_endpoint;
use protocol::{DEFAULT_INTERRUPT_ENDPOINT, InputMode, PinLayout, Polarity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub pins: PinSettings,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub demo: DemoSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "AppSettings::default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl AppSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_vendor_id", with = "hex_id")]
    pub vendor_id: u16,
    #[serde(default = "DeviceSettings::default_product_id", with = "hex_id")]
    pub product_id: u16,
    /// Interfaces whose kernel driver is detached on open
    #[serde(default = "DeviceSettings::default_detach_interfaces")]
    pub detach_interfaces: Vec<u8>,
    /// Interface claimed for report requests
    #[serde(default)]
    pub interface: u8,
    #[serde(default = "DeviceSettings::default_endpoint", with = "hex_endpoint")]
    pub interrupt_endpoint: u8,
    /// Send SET_IDLE(0) so the keyboard only reports changes
    #[serde(default)]
    pub infinite_idle: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            detach_interfaces: Self::default_detach_interfaces(),
            interface: 0,
            interrupt_endpoint: Self::default_endpoint(),
            infinite_idle: false,
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        DEFAULT_VENDOR_ID
    }

    fn default_product_id() -> u16 {
        DEFAULT_PRODUCT_ID
    }

    fn default_detach_interfaces() -> Vec<u8> {
        vec![0, 1]
    }

    fn default_endpoint() -> u8 {
        DEFAULT_INTERRUPT_ENDPOINT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSettings {
    #[serde(default = "PinSettings::default_outputs")]
    pub outputs: u8,
    #[serde(default = "PinSettings::default_inputs")]
    pub inputs: u8,
    /// Logical 1 clears the LED bit
    #[serde(default)]
    pub output_invert: bool,
    /// Set modifier bit reads as logical 0
    #[serde(default)]
    pub input_invert: bool,
}

impl Default for PinSettings {
    fn default() -> Self {
        Self {
            outputs: Self::default_outputs(),
            inputs: Self::default_inputs(),
            output_invert: false,
            input_invert: false,
        }
    }
}

impl PinSettings {
    fn default_outputs() -> u8 {
        PinLayout::default().outputs
    }

    fn default_inputs() -> u8 {
        PinLayout::default().inputs
    }

    pub fn layout(&self) -> PinLayout {
        PinLayout {
            outputs: self.outputs,
            inputs: self.inputs,
        }
    }

    pub fn polarity(&self) -> Polarity {
        Polarity {
            output_invert: self.output_invert,
            input_invert: self.input_invert,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSettings {
    #[serde(default)]
    pub mode: InputMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "TimingSettings::default_output_settle_us")]
    pub output_settle_us: u64,
    /// Defaults to 40 ms polled, 50 ms cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_settle_ms: Option<u64>,
    /// 0 waits forever
    #[serde(default)]
    pub control_timeout_ms: u64,
    #[serde(default = "TimingSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            output_settle_us: Self::default_output_settle_us(),
            input_settle_ms: None,
            control_timeout_ms: 0,
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl TimingSettings {
    fn default_output_settle_us() -> u64 {
        500
    }

    fn default_poll_interval_ms() -> u64 {
        1000
    }

    pub fn pin_timing(&self, mode: InputMode) -> PinTiming {
        PinTiming {
            output_settle: Duration::from_micros(self.output_settle_us),
            input_settle: self
                .input_settle_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| default_input_settle(mode)),
            control_timeout: Duration::from_millis(self.control_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoSettings {
    /// Delay between chase steps
    #[serde(default = "DemoSettings::default_step_ms")]
    pub step_ms: u64,
    /// Read and log all input pins every step
    #[serde(default = "DemoSettings::default_watch_inputs")]
    pub watch_inputs: bool,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            step_ms: Self::default_step_ms(),
            watch_inputs: Self::default_watch_inputs(),
        }
    }
}

impl DemoSettings {
    fn default_step_ms() -> u64 {
        500
    }

    fn default_watch_inputs() -> bool {
        true
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

/// Serde module for `"0x045e"` style 16-bit identifiers
mod hex_id {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#06x}", id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_id(&s, "id").map_err(serde::de::Error::custom)
    }
}

/// Serde module for `"0x81"` style endpoint addresses
mod hex_endpoint {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(endpoint: &u8, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#04x}", endpoint))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = super::parse_hex_id(&s, "endpoint").map_err(serde::de::Error::custom)?;
        u8::try_from(value).map_err(|_| {
            serde::de::Error::custom(format!("Invalid endpoint '{}', must fit in one byte", s))
        })
    }
}

/// Parse a `0x`-prefixed hex identifier of 1-4 digits
pub fn parse_hex_id(id: &str, name: &str) -> std::result::Result<u16, String> {
    let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(format!(
            "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
            name, id
        ));
    };

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(format!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name, id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| format!("Invalid {} '{}', not a valid hex number", name, id))
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            Self::candidate_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load from the standard locations, or return defaults if none exists
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_or_default(&Self::candidate_paths())
    }

    /// Load the first existing file in `candidates`, or return defaults
    pub fn load_first_or_default(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load(Some(path.clone())),
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Standard configuration locations, in lookup order
    pub fn candidate_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/hidkey-gpio/config.toml"),
        ]
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hidkey-gpio").join("config.toml")
        } else {
            PathBuf::from(".config/hidkey-gpio/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.app.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.app.log_level,
                valid_levels.join(", ")
            ));
        }

        self.pins.layout().validate()?;

        if !is_in_endpoint(self.device.interrupt_endpoint) {
            return Err(anyhow!(
                "Invalid interrupt endpoint {:#04x}, must be an IN endpoint (bit 7 set)",
                self.device.interrupt_endpoint
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        if self.demo.step_ms == 0 {
            return Err(anyhow!("step_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Runtime options for [`crate::HidGpio::open`]
    pub fn gpio_options(&self) -> GpioOptions {
        let mode = self.input.mode;
        GpioOptions {
            vendor_id: self.device.vendor_id,
            product_id: self.device.product_id,
            detach_interfaces: self.device.detach_interfaces.clone(),
            interface: self.device.interface,
            interrupt_endpoint: self.device.interrupt_endpoint,
            infinite_idle: self.device.infinite_idle,
            layout: self.pins.layout(),
            polarity: self.pins.polarity(),
            input_mode: mode,
            timing: self.timing.pin_timing(mode),
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
        }
    }
}
