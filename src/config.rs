//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub vtx: VtxConfig,
    #[serde(default)]
    pub auto_power: AutoPowerConfig,
}

/// Which control protocol the transmitter speaks
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    SmartAudio,
    Tramp,
}

/// Disarm power-reduction policy
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LowPowerDisarm {
    /// Never touch the power on disarm
    #[default]
    Off,
    /// Lowest power whenever disarmed
    Always,
    /// Lowest power only before the first arm of the session
    UntilFirstArm,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    pub backend: BackendKind,
}

/// Desired transmitter state
#[derive(Debug, Deserialize, Clone)]
pub struct VtxConfig {
    /// 1-origin band, or 0 for direct frequency control via `freq`
    #[serde(default = "default_band")]
    pub band: u8,

    #[serde(default = "default_channel")]
    pub channel: u8,

    /// 1-origin power index into the device's power table
    #[serde(default = "default_power")]
    pub power: u8,

    /// Target frequency in MHz, used only when band is 0
    #[serde(default = "default_freq")]
    pub freq: u16,

    #[serde(default = "default_pit_mode_channel")]
    pub pit_mode_channel: u8,

    #[serde(default)]
    pub low_power_disarm: LowPowerDisarm,

    /// Caps the device power table when non-zero (regulatory limits)
    #[serde(default)]
    pub max_power_override_mw: u16,
}

/// Distance-based automatic power selection
#[derive(Debug, Deserialize, Clone)]
pub struct AutoPowerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Distance in meters the 25 mW reference level is trusted to cover
    #[serde(default = "default_reference_distance_m")]
    pub reference_distance_m: u32,
}

impl Default for AutoPowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reference_distance_m: default_reference_distance_m(),
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyS1".to_string() }

fn default_band() -> u8 { 4 }
fn default_channel() -> u8 { 1 }
fn default_power() -> u8 { 1 }
fn default_freq() -> u16 { 5740 }
fn default_pit_mode_channel() -> u8 { 1 }

fn default_reference_distance_m() -> u32 { 300 }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        // Band 0 selects direct frequency control
        if self.vtx.band > 5 {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("band must be between 0 and 5")
            ));
        }

        if self.vtx.band == 0 && !(5000..=5999).contains(&self.vtx.freq) {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("freq must be between 5000 and 5999 when band is 0")
            ));
        }

        if self.vtx.channel == 0 || self.vtx.channel > 8 {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("channel must be between 1 and 8")
            ));
        }

        if self.vtx.power == 0 || self.vtx.power > 8 {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("power must be between 1 and 8")
            ));
        }

        if self.vtx.pit_mode_channel == 0 || self.vtx.pit_mode_channel > 8 {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("pit_mode_channel must be between 1 and 8")
            ));
        }

        if self.auto_power.enabled
            && !(1..=10000).contains(&self.auto_power.reference_distance_m)
        {
            return Err(crate::error::VtxBridgeError::Config(
                toml::de::Error::custom("reference_distance_m must be between 1 and 10000")
            ));
        }

        Ok(())
    }
}
